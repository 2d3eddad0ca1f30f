//! Profile pages, follow edges, user search and account deletion.

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::auth::AuthUser;
use crate::db::DbPool;
use crate::error::ApiError;
use crate::media;
use crate::models::notification::{NewNotification, NotificationKind};
use crate::models::post::comment_decrements;
use crate::models::user::{
    follow_transition, FollowDetail, ProfileView, SearchQuery, User, UserSearchResult,
};
use crate::notify;
use crate::schema::{comments, followers, lower, post_likes, posts, stories, users};

const MAX_BIO_LEN: usize = 500;
const SEARCH_LIMIT: usize = 20;

pub(super) async fn find_user_by_username(
    conn: &mut AsyncPgConnection,
    username: &str,
) -> Result<User, ApiError> {
    users::table
        .filter(lower(users::username).eq(username.to_lowercase()))
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))
}

/// GET /api/profile/:username
pub async fn get_profile(
    State(pool): State<DbPool>,
    viewer: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<ProfileView>, ApiError> {
    let mut conn = pool.get().await?;
    let user = find_user_by_username(&mut conn, &username).await?;

    let follower_count: i64 = followers::table
        .filter(followers::following_id.eq(user.id))
        .count()
        .get_result(&mut conn)
        .await?;
    let following_count: i64 = followers::table
        .filter(followers::follower_id.eq(user.id))
        .count()
        .get_result(&mut conn)
        .await?;
    let post_count: i64 = posts::table
        .filter(posts::user_id.eq(user.id))
        .count()
        .get_result(&mut conn)
        .await?;
    let is_following: i64 = followers::table
        .filter(followers::follower_id.eq(viewer.id))
        .filter(followers::following_id.eq(user.id))
        .count()
        .get_result(&mut conn)
        .await?;

    Ok(Json(ProfileView {
        id: user.id,
        username: user.username,
        full_name: user.full_name,
        bio: user.bio,
        profile_image: user.profile_image,
        followers: follower_count,
        following: following_count,
        posts: post_count,
        is_following: is_following > 0,
        created_at: user.created_at,
    }))
}

/// PUT /api/profile (multipart: fullName, bio, profileImage)
pub async fn update_profile(
    State(pool): State<DbPool>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<User>, ApiError> {
    let mut full_name: Option<String> = None;
    let mut bio: Option<String> = None;
    let mut image: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name().unwrap_or_default() {
            "fullName" | "full_name" => full_name = Some(field.text().await?),
            "bio" => bio = Some(field.text().await?),
            "profileImage" | "profile_image" => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await?;
                if !bytes.is_empty() {
                    image = Some((name, bytes.to_vec()));
                }
            }
            _ => {}
        }
    }

    // Over-long bios are truncated rather than rejected
    let bio = bio.map(|b| b.chars().take(MAX_BIO_LEN).collect::<String>());
    if let Some(ref name) = full_name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("full name cannot be empty".to_string()));
        }
    }

    let mut conn = pool.get().await?;
    let current: User = users::table.find(user.id).first(&mut conn).await?;

    let new_image = match image {
        Some((name, bytes)) => Some(media::save_media(&name, &bytes).await?),
        None => None,
    };

    let updated: User = diesel::update(users::table.find(user.id))
        .set((
            users::full_name.eq(full_name.map(|n| n.trim().to_string()).unwrap_or(current.full_name)),
            users::bio.eq(bio.or(current.bio)),
            users::profile_image.eq(new_image.clone().or(current.profile_image.clone())),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)
        .await?;

    // Old image is only reclaimed once the new reference is committed
    if new_image.is_some() {
        if let Some(old) = current.profile_image {
            if let Err(e) = media::remove_media(&old).await {
                warn!("could not remove replaced profile image {old}: {e}");
            }
        }
    }

    Ok(Json(updated))
}

/// POST /api/profile/follow/:username
///
/// Toggles the follow edge. The check and the write share one transaction
/// so two racing requests cannot double-insert; the unique index backstops
/// anything that still slips through.
pub async fn toggle_follow(
    State(pool): State<DbPool>,
    user: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = pool.get().await?;
    let target = find_user_by_username(&mut conn, &username).await?;

    if target.id == user.id {
        return Err(ApiError::Validation("cannot follow yourself".to_string()));
    }

    let follower_id = user.id;
    let following_id = target.id;
    let now_following = conn
        .transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let existing: i64 = followers::table
                    .filter(followers::follower_id.eq(follower_id))
                    .filter(followers::following_id.eq(following_id))
                    .count()
                    .get_result(conn)
                    .await?;

                let now_following = follow_transition(existing > 0);
                if now_following {
                    // A racing duplicate insert is absorbed; the edge exists
                    // either way
                    diesel::insert_into(followers::table)
                        .values((
                            followers::follower_id.eq(follower_id),
                            followers::following_id.eq(following_id),
                        ))
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;
                } else {
                    diesel::delete(
                        followers::table
                            .filter(followers::follower_id.eq(follower_id))
                            .filter(followers::following_id.eq(following_id)),
                    )
                    .execute(conn)
                    .await?;
                }
                Ok(now_following)
            }
            .scope_boxed()
        })
        .await?;

    let follower_count: i64 = followers::table
        .filter(followers::following_id.eq(target.id))
        .count()
        .get_result(&mut conn)
        .await?;

    if now_following {
        notify::emit(
            &pool,
            NewNotification {
                user_id: target.id,
                kind: NotificationKind::Follow.as_str().to_string(),
                actor_id: Some(user.id),
                actor_username: user.username.clone(),
                post_id: None,
                message_id: None,
                body: format!("{} started following you", user.username),
            },
        )
        .await;
    }

    Ok(Json(json!({
        "is_following": now_following,
        "followers": follower_count,
    })))
}

/// GET /api/profile/search?q=
pub async fn search_users(
    State(pool): State<DbPool>,
    viewer: AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserSearchResult>>, ApiError> {
    let q = query.q.unwrap_or_default().trim().to_string();
    if q.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let pattern = format!("%{q}%");
    let mut conn = pool.get().await?;

    let candidates: Vec<User> = users::table
        .filter(
            users::username
                .ilike(&pattern)
                .or(users::full_name.ilike(&pattern)),
        )
        .filter(users::id.ne(viewer.id))
        .load(&mut conn)
        .await?;

    let ids: Vec<i32> = candidates.iter().map(|u| u.id).collect();

    let follower_counts: HashMap<i32, i64> = followers::table
        .filter(followers::following_id.eq_any(&ids))
        .group_by(followers::following_id)
        .select((followers::following_id, diesel::dsl::count_star()))
        .load::<(i32, i64)>(&mut conn)
        .await?
        .into_iter()
        .collect();

    let followed: Vec<i32> = followers::table
        .filter(followers::follower_id.eq(viewer.id))
        .filter(followers::following_id.eq_any(&ids))
        .select(followers::following_id)
        .load(&mut conn)
        .await?;

    let mut results: Vec<UserSearchResult> = candidates
        .into_iter()
        .map(|u| UserSearchResult {
            follower_count: follower_counts.get(&u.id).copied().unwrap_or(0),
            is_following: followed.contains(&u.id),
            id: u.id,
            username: u.username,
            full_name: u.full_name,
            profile_image: u.profile_image,
            is_online: u.is_online,
        })
        .collect();

    // Username matches outrank name-only matches, then larger audiences first
    let needle = q.to_lowercase();
    results.sort_by(|a, b| {
        let a_name = a.username.to_lowercase().contains(&needle);
        let b_name = b.username.to_lowercase().contains(&needle);
        b_name
            .cmp(&a_name)
            .then(b.follower_count.cmp(&a.follower_count))
            .then(a.username.cmp(&b.username))
    });
    results.truncate(SEARCH_LIMIT);

    Ok(Json(results))
}

/// GET /api/profile/:username/followers
pub async fn list_followers(
    State(pool): State<DbPool>,
    _viewer: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<Vec<FollowDetail>>, ApiError> {
    let mut conn = pool.get().await?;
    let user = find_user_by_username(&mut conn, &username).await?;

    let edges: Vec<(i32, chrono::NaiveDateTime)> = followers::table
        .filter(followers::following_id.eq(user.id))
        .order(followers::created_at.desc())
        .select((followers::follower_id, followers::created_at))
        .load(&mut conn)
        .await?;

    Ok(Json(load_follow_details(&mut conn, edges).await?))
}

/// GET /api/profile/:username/following
pub async fn list_following(
    State(pool): State<DbPool>,
    _viewer: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<Vec<FollowDetail>>, ApiError> {
    let mut conn = pool.get().await?;
    let user = find_user_by_username(&mut conn, &username).await?;

    let edges: Vec<(i32, chrono::NaiveDateTime)> = followers::table
        .filter(followers::follower_id.eq(user.id))
        .order(followers::created_at.desc())
        .select((followers::following_id, followers::created_at))
        .load(&mut conn)
        .await?;

    Ok(Json(load_follow_details(&mut conn, edges).await?))
}

async fn load_follow_details(
    conn: &mut AsyncPgConnection,
    edges: Vec<(i32, chrono::NaiveDateTime)>,
) -> Result<Vec<FollowDetail>, ApiError> {
    let ids: Vec<i32> = edges.iter().map(|(id, _)| *id).collect();
    let members: HashMap<i32, User> = users::table
        .filter(users::id.eq_any(&ids))
        .load::<User>(conn)
        .await?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    Ok(edges
        .into_iter()
        .filter_map(|(id, followed_at)| {
            members.get(&id).map(|u| FollowDetail {
                id: u.id,
                username: u.username.clone(),
                full_name: u.full_name.clone(),
                profile_image: u.profile_image.clone(),
                followed_at,
            })
        })
        .collect())
}

/// DELETE /api/profile
pub async fn delete_own_account(
    State(pool): State<DbPool>,
    user: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    delete_user_account(&pool, user.id).await?;
    Ok(Json(json!({ "message": "account deleted" })))
}

/// Remove an account and everything it owns. Posts, likes, comments,
/// stories, follow edges and inbound notifications go with it; messages the
/// user exchanged survive with the sender/receiver reference nulled out and
/// the stored username left in place.
///
/// Denormalized like/comment counters on other users' posts are corrected
/// in the same transaction so they do not drift.
pub(super) async fn delete_user_account(pool: &DbPool, user_id: i32) -> Result<(), ApiError> {
    let mut conn = pool.get().await?;

    let user: User = users::table
        .find(user_id)
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

    // Collect media references before the rows disappear
    let mut media_refs: Vec<String> = posts::table
        .filter(posts::user_id.eq(user_id))
        .select(posts::media)
        .load(&mut conn)
        .await?;
    media_refs.extend(
        stories::table
            .filter(stories::user_id.eq(user_id))
            .select(stories::media)
            .load::<String>(&mut conn)
            .await?,
    );
    if let Some(image) = &user.profile_image {
        media_refs.push(image.clone());
    }

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        async move {
            // Likes and comments this user left on other posts cascade away
            // with the user row; pull the counters down to match.
            let liked_ids: Vec<i32> = post_likes::table
                .filter(post_likes::user_id.eq(user_id))
                .select(post_likes::post_id)
                .load(conn)
                .await?;
            diesel::update(posts::table.filter(posts::id.eq_any(&liked_ids)))
                .set(posts::likes_count.eq(diesel::dsl::sql::<diesel::sql_types::Integer>(
                    "GREATEST(likes_count - 1, 0)",
                )))
                .execute(conn)
                .await?;

            let commented_ids: Vec<i32> = comments::table
                .filter(comments::user_id.eq(user_id))
                .select(comments::post_id)
                .load(conn)
                .await?;
            for (post_id, n) in comment_decrements(commented_ids) {
                diesel::update(posts::table.find(post_id))
                    .set(posts::comments_count.eq(diesel::dsl::sql::<
                        diesel::sql_types::Integer,
                    >(&format!(
                        "GREATEST(comments_count - {n}, 0)"
                    ))))
                    .execute(conn)
                    .await?;
            }

            // The cascade takes the inbox, posts, likes, comments, stories
            // and follow edges. Message rows and notifications acted by the
            // user stay: those FKs are ON DELETE SET NULL and the
            // denormalized usernames keep them readable.
            diesel::delete(users::table.find(user_id)).execute(conn).await?;
            Ok(())
        }
        .scope_boxed()
    })
    .await?;

    for reference in media_refs {
        if let Err(e) = media::remove_media(&reference).await {
            warn!("could not remove media {reference} for deleted user: {e}");
        }
    }

    info!("Deleted account '{}' (id {})", user.username, user_id);
    Ok(())
}
