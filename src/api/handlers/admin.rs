//! Administration surface. Every route requires the admin flag on the
//! session token, enforced by the `AdminUser` extractor.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::auth::AdminUser;
use crate::db::DbPool;
use crate::error::ApiError;
use crate::media;
use crate::models::user::User;
use crate::schema::{comments, followers, messages, post_likes, posts, users};

#[derive(Debug, Serialize)]
pub struct AdminUserView {
    pub id: i32,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub profile_image: Option<String>,
    pub is_admin: bool,
    pub is_online: bool,
    pub created_at: NaiveDateTime,
    pub post_count: i64,
    pub follower_count: i64,
    pub following_count: i64,
}

/// GET /api/admin/users
pub async fn list_users(
    State(pool): State<DbPool>,
    _admin: AdminUser,
) -> Result<Json<Vec<AdminUserView>>, ApiError> {
    let mut conn = pool.get().await?;

    let members: Vec<User> = users::table
        .order(users::created_at.desc())
        .load(&mut conn)
        .await?;

    let post_counts: HashMap<i32, i64> = posts::table
        .group_by(posts::user_id)
        .select((posts::user_id, diesel::dsl::count_star()))
        .load::<(i32, i64)>(&mut conn)
        .await?
        .into_iter()
        .collect();
    let follower_counts: HashMap<i32, i64> = followers::table
        .group_by(followers::following_id)
        .select((followers::following_id, diesel::dsl::count_star()))
        .load::<(i32, i64)>(&mut conn)
        .await?
        .into_iter()
        .collect();
    let following_counts: HashMap<i32, i64> = followers::table
        .group_by(followers::follower_id)
        .select((followers::follower_id, diesel::dsl::count_star()))
        .load::<(i32, i64)>(&mut conn)
        .await?
        .into_iter()
        .collect();

    let views = members
        .into_iter()
        .map(|u| AdminUserView {
            post_count: post_counts.get(&u.id).copied().unwrap_or(0),
            follower_count: follower_counts.get(&u.id).copied().unwrap_or(0),
            following_count: following_counts.get(&u.id).copied().unwrap_or(0),
            id: u.id,
            email: u.email,
            username: u.username,
            full_name: u.full_name,
            profile_image: u.profile_image,
            is_admin: u.is_admin,
            is_online: u.is_online,
            created_at: u.created_at,
        })
        .collect();

    Ok(Json(views))
}

/// DELETE /api/admin/users/:id
pub async fn delete_user(
    State(pool): State<DbPool>,
    admin: AdminUser,
    Path(user_id): Path<i32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if user_id == admin.0.id {
        return Err(ApiError::Validation(
            "cannot delete your own account from the admin panel".to_string(),
        ));
    }

    super::profiles::delete_user_account(&pool, user_id).await?;
    info!("Admin '{}' deleted user {}", admin.0.username, user_id);

    Ok(Json(json!({ "message": "user deleted" })))
}

/// GET /api/admin/stats
pub async fn get_stats(
    State(pool): State<DbPool>,
    _admin: AdminUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = pool.get().await?;

    let total_users: i64 = users::table.count().get_result(&mut conn).await?;
    let total_admins: i64 = users::table
        .filter(users::is_admin.eq(true))
        .count()
        .get_result(&mut conn)
        .await?;
    let online_users: i64 = users::table
        .filter(users::is_online.eq(true))
        .count()
        .get_result(&mut conn)
        .await?;
    let total_posts: i64 = posts::table.count().get_result(&mut conn).await?;
    let total_comments: i64 = comments::table.count().get_result(&mut conn).await?;
    let total_likes: i64 = post_likes::table.count().get_result(&mut conn).await?;
    let total_messages: i64 = messages::table.count().get_result(&mut conn).await?;

    let week_ago = (Utc::now() - chrono::Duration::days(7)).naive_utc();
    let new_users_week: i64 = users::table
        .filter(users::created_at.gt(week_ago))
        .count()
        .get_result(&mut conn)
        .await?;

    Ok(Json(json!({
        "total_users": total_users,
        "total_admins": total_admins,
        "total_regular_users": total_users - total_admins,
        "online_users": online_users,
        "new_users_week": new_users_week,
        "total_posts": total_posts,
        "total_comments": total_comments,
        "total_likes": total_likes,
        "total_messages": total_messages,
    })))
}

/// POST /api/admin/users/:id/profile-image
pub async fn set_profile_image(
    State(pool): State<DbPool>,
    admin: AdminUser,
    Path(user_id): Path<i32>,
    mut multipart: Multipart,
) -> Result<Json<User>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await? {
        if matches!(field.name().unwrap_or_default(), "profileImage" | "profile_image" | "image") {
            let name = field.file_name().unwrap_or("upload").to_string();
            let bytes = field.bytes().await?;
            if !bytes.is_empty() {
                upload = Some((name, bytes.to_vec()));
            }
        }
    }
    let (file_name, bytes) =
        upload.ok_or_else(|| ApiError::Validation("an image file is required".to_string()))?;

    let mut conn = pool.get().await?;
    let target: User = users::table
        .find(user_id)
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

    let reference = media::save_media(&file_name, &bytes).await?;

    let updated: User = diesel::update(users::table.find(user_id))
        .set((
            users::profile_image.eq(Some(reference)),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)
        .await?;

    if let Some(old) = target.profile_image {
        if let Err(e) = media::remove_media(&old).await {
            warn!("could not remove replaced profile image {old}: {e}");
        }
    }

    info!(
        "Admin '{}' replaced profile image for user {}",
        admin.0.username, user_id
    );
    Ok(Json(updated))
}
