//! Posts, likes, comments, the home feed, reels and stories.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde_json::json;
use std::collections::HashMap;
use tracing::warn;

use crate::auth::AuthUser;
use crate::db::DbPool;
use crate::error::ApiError;
use crate::media;
use crate::models::notification::{NewNotification, NotificationKind};
use crate::models::post::{
    like_transition, parse_hashtags, Comment, CommentPayload, CommentView, NewComment, NewPost,
    NewPostHashtag, NewPostLike, Post, PostView,
};
use crate::models::story::{NewStory, Story, StoryView, STORY_TTL_HOURS};
use crate::notify;
use crate::schema::{comments, followers, post_hashtags, post_likes, posts, stories, users};

const FEED_LIMIT: i64 = 50;
const REELS_LIMIT: i64 = 20;

/// POST /api/posts (multipart: media, caption, hashtags)
pub async fn create_post(
    State(pool): State<DbPool>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<PostView>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut caption = String::new();
    let mut hashtags_raw = String::new();

    while let Some(field) = multipart.next_field().await? {
        match field.name().unwrap_or_default() {
            "media" | "image" => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await?;
                if !bytes.is_empty() {
                    upload = Some((name, bytes.to_vec()));
                }
            }
            "caption" | "title" => caption = field.text().await?,
            "hashtags" => hashtags_raw = field.text().await?,
            _ => {}
        }
    }

    let (file_name, bytes) = upload.ok_or_else(|| {
        ApiError::Validation("a media file is required".to_string())
    })?;

    let reference = media::save_media(&file_name, &bytes).await?;
    let hashtags = parse_hashtags(&hashtags_raw);

    let mut conn = pool.get().await?;
    let profile_image = author_image(&mut conn, user.id).await?;

    let new_post = NewPost {
        user_id: user.id,
        media: reference.clone(),
        caption: caption.trim().to_string(),
    };
    let tags = hashtags.clone();
    let result = conn
        .transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let post: Post = diesel::insert_into(posts::table)
                    .values(&new_post)
                    .get_result(conn)
                    .await?;

                let rows: Vec<NewPostHashtag> = tags
                    .into_iter()
                    .map(|hashtag| NewPostHashtag { post_id: post.id, hashtag })
                    .collect();
                if !rows.is_empty() {
                    diesel::insert_into(post_hashtags::table)
                        .values(&rows)
                        .execute(conn)
                        .await?;
                }

                Ok(post)
            }
            .scope_boxed()
        })
        .await;

    let post = match result {
        Ok(post) => post,
        Err(e) => {
            // Do not leave the uploaded file orphaned on a failed insert
            if let Err(io) = media::remove_media(&reference).await {
                warn!("could not remove orphaned upload {reference}: {io}");
            }
            return Err(e.into());
        }
    };

    // Everything after the commit is best-effort; the post already stands.
    notify::fan_out_post(&pool, user.id, &user.username, post.id).await;

    Ok(Json(PostView {
        id: post.id,
        user_id: post.user_id,
        username: user.username,
        profile_image,
        media: post.media,
        caption: post.caption,
        likes_count: 0,
        comments_count: 0,
        is_liked: false,
        hashtags,
        created_at: post.created_at,
        comments: None,
    }))
}

/// GET /api/posts/feed
///
/// Latest posts from the caller and everyone they follow, newest first,
/// with comments eagerly attached in posting order.
pub async fn get_feed(
    State(pool): State<DbPool>,
    user: AuthUser,
) -> Result<Json<Vec<PostView>>, ApiError> {
    let mut conn = pool.get().await?;

    let mut author_ids: Vec<i32> = followers::table
        .filter(followers::follower_id.eq(user.id))
        .select(followers::following_id)
        .load(&mut conn)
        .await?;
    author_ids.push(user.id);

    let rows: Vec<(Post, String, Option<String>)> = posts::table
        .inner_join(users::table)
        .filter(posts::user_id.eq_any(&author_ids))
        .order(posts::created_at.desc())
        .limit(FEED_LIMIT)
        .select((Post::as_select(), users::username, users::profile_image))
        .load(&mut conn)
        .await?;

    Ok(Json(load_post_views(&mut conn, user.id, rows, true).await?))
}

/// GET /api/posts/user/:username
pub async fn get_user_posts(
    State(pool): State<DbPool>,
    viewer: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<Vec<PostView>>, ApiError> {
    let mut conn = pool.get().await?;
    let user = super::profiles::find_user_by_username(&mut conn, &username).await?;

    let rows: Vec<(Post, String, Option<String>)> = posts::table
        .inner_join(users::table)
        .filter(posts::user_id.eq(user.id))
        .order(posts::created_at.desc())
        .select((Post::as_select(), users::username, users::profile_image))
        .load(&mut conn)
        .await?;

    Ok(Json(load_post_views(&mut conn, viewer.id, rows, false).await?))
}

/// GET /api/posts/reels
///
/// Video posts from anyone, newest first. Classification is by file
/// extension of the stored media reference.
pub async fn get_reels(
    State(pool): State<DbPool>,
    viewer: AuthUser,
) -> Result<Json<Vec<PostView>>, ApiError> {
    let mut conn = pool.get().await?;

    let rows: Vec<(Post, String, Option<String>)> = posts::table
        .inner_join(users::table)
        .filter(
            posts::media
                .ilike("%.mp4")
                .or(posts::media.ilike("%.mov"))
                .or(posts::media.ilike("%.webm"))
                .or(posts::media.ilike("%.avi"))
                .or(posts::media.ilike("%.mkv")),
        )
        .order(posts::created_at.desc())
        .limit(REELS_LIMIT)
        .select((Post::as_select(), users::username, users::profile_image))
        .load(&mut conn)
        .await?;

    Ok(Json(load_post_views(&mut conn, viewer.id, rows, false).await?))
}

/// POST /api/posts/:id/like
pub async fn toggle_like(
    State(pool): State<DbPool>,
    user: AuthUser,
    Path(post_id): Path<i32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = pool.get().await?;

    let post: Post = posts::table
        .find(post_id)
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("post not found".to_string()))?;

    let user_id = user.id;
    let (liked, likes_count) = conn
        .transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let existing: i64 = post_likes::table
                    .filter(post_likes::post_id.eq(post_id))
                    .filter(post_likes::user_id.eq(user_id))
                    .count()
                    .get_result(conn)
                    .await?;

                let (liked, counter) = like_transition(existing > 0);

                // A racing request may have flipped the row between the
                // check and the write; when it did, it also owns the
                // counter update, so skip ours.
                let counter = if liked {
                    let inserted = diesel::insert_into(post_likes::table)
                        .values(&NewPostLike { post_id, user_id })
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;
                    (inserted > 0).then_some(counter)
                } else {
                    let deleted = diesel::delete(
                        post_likes::table
                            .filter(post_likes::post_id.eq(post_id))
                            .filter(post_likes::user_id.eq(user_id)),
                    )
                    .execute(conn)
                    .await?;
                    (deleted > 0).then_some(counter)
                };

                let likes_count: i32 = match counter {
                    Some(expr) => diesel::update(posts::table.find(post_id))
                        .set(posts::likes_count.eq(diesel::dsl::sql::<
                            diesel::sql_types::Integer,
                        >(expr)))
                        .returning(posts::likes_count)
                        .get_result(conn)
                        .await?,
                    None => posts::table
                        .find(post_id)
                        .select(posts::likes_count)
                        .get_result(conn)
                        .await?,
                };

                Ok((liked, likes_count))
            }
            .scope_boxed()
        })
        .await?;

    if liked {
        notify::emit(
            &pool,
            NewNotification {
                user_id: post.user_id,
                kind: NotificationKind::Like.as_str().to_string(),
                actor_id: Some(user.id),
                actor_username: user.username.clone(),
                post_id: Some(post_id),
                message_id: None,
                body: format!("{} liked your post", user.username),
            },
        )
        .await;
    }

    Ok(Json(json!({
        "is_liked": liked,
        "likes_count": likes_count,
    })))
}

/// POST /api/posts/:id/comments
pub async fn add_comment(
    State(pool): State<DbPool>,
    user: AuthUser,
    Path(post_id): Path<i32>,
    Json(payload): Json<CommentPayload>,
) -> Result<Json<CommentView>, ApiError> {
    let body = payload.text.trim().to_string();
    if body.is_empty() {
        return Err(ApiError::Validation("comment text is required".to_string()));
    }

    let mut conn = pool.get().await?;

    let post: Post = posts::table
        .find(post_id)
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("post not found".to_string()))?;

    let new_comment = NewComment {
        post_id,
        user_id: user.id,
        body,
    };
    let comment: Comment = conn
        .transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let comment: Comment = diesel::insert_into(comments::table)
                    .values(&new_comment)
                    .get_result(conn)
                    .await?;

                diesel::update(posts::table.find(post_id))
                    .set(posts::comments_count.eq(posts::comments_count + 1))
                    .execute(conn)
                    .await?;

                Ok(comment)
            }
            .scope_boxed()
        })
        .await?;

    notify::emit(
        &pool,
        NewNotification {
            user_id: post.user_id,
            kind: NotificationKind::Comment.as_str().to_string(),
            actor_id: Some(user.id),
            actor_username: user.username.clone(),
            post_id: Some(post_id),
            message_id: None,
            body: format!("{} commented on your post", user.username),
        },
    )
    .await;

    let profile_image = author_image(&mut conn, user.id).await?;

    Ok(Json(CommentView {
        id: comment.id,
        post_id: comment.post_id,
        user_id: comment.user_id,
        username: user.username,
        profile_image,
        body: comment.body,
        created_at: comment.created_at,
    }))
}

/// PUT /api/posts/comments/:id
pub async fn update_comment(
    State(pool): State<DbPool>,
    user: AuthUser,
    Path(comment_id): Path<i32>,
    Json(payload): Json<CommentPayload>,
) -> Result<Json<Comment>, ApiError> {
    let body = payload.text.trim().to_string();
    if body.is_empty() {
        return Err(ApiError::Validation("comment text is required".to_string()));
    }

    let mut conn = pool.get().await?;
    let comment = owned_comment(&mut conn, comment_id, user.id).await?;

    let updated: Comment = diesel::update(comments::table.find(comment.id))
        .set((comments::body.eq(body), comments::updated_at.eq(Utc::now().naive_utc())))
        .get_result(&mut conn)
        .await?;

    Ok(Json(updated))
}

/// DELETE /api/posts/comments/:id
pub async fn delete_comment(
    State(pool): State<DbPool>,
    user: AuthUser,
    Path(comment_id): Path<i32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = pool.get().await?;
    let comment = owned_comment(&mut conn, comment_id, user.id).await?;

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        async move {
            diesel::delete(comments::table.find(comment.id)).execute(conn).await?;
            diesel::update(posts::table.find(comment.post_id))
                .set(posts::comments_count.eq(diesel::dsl::sql::<diesel::sql_types::Integer>(
                    "GREATEST(comments_count - 1, 0)",
                )))
                .execute(conn)
                .await?;
            Ok(())
        }
        .scope_boxed()
    })
    .await?;

    Ok(Json(json!({ "message": "comment deleted" })))
}

/// Ownership is keyed on the author id alone; usernames can be recycled.
async fn owned_comment(
    conn: &mut AsyncPgConnection,
    comment_id: i32,
    user_id: i32,
) -> Result<Comment, ApiError> {
    let comment: Comment = comments::table
        .find(comment_id)
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("comment not found".to_string()))?;

    if comment.user_id != user_id {
        return Err(ApiError::Forbidden("not your comment".to_string()));
    }
    Ok(comment)
}

/// GET /api/posts/stories
///
/// Every unexpired story from the caller and the authors they follow,
/// newest first.
pub async fn get_stories(
    State(pool): State<DbPool>,
    user: AuthUser,
) -> Result<Json<Vec<StoryView>>, ApiError> {
    let mut conn = pool.get().await?;

    let mut author_ids: Vec<i32> = followers::table
        .filter(followers::follower_id.eq(user.id))
        .select(followers::following_id)
        .load(&mut conn)
        .await?;
    author_ids.push(user.id);

    let rows: Vec<(Story, String, Option<String>)> = stories::table
        .inner_join(users::table)
        .filter(stories::user_id.eq_any(&author_ids))
        .filter(stories::expires_at.gt(Utc::now().naive_utc()))
        .order(stories::created_at.desc())
        .select((Story::as_select(), users::username, users::profile_image))
        .load(&mut conn)
        .await?;

    Ok(Json(story_views(rows)))
}

/// An author with several active stories contributes all of them; the
/// query's newest-first order is preserved as-is.
fn story_views(rows: Vec<(Story, String, Option<String>)>) -> Vec<StoryView> {
    rows.into_iter()
        .map(|(story, username, profile_image)| StoryView {
            id: story.id,
            user_id: story.user_id,
            username,
            profile_image,
            media: story.media,
            caption: story.caption,
            created_at: story.created_at,
            expires_at: story.expires_at,
        })
        .collect()
}

/// POST /api/posts/stories (multipart: media, caption)
pub async fn create_story(
    State(pool): State<DbPool>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<Story>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut caption = String::new();

    while let Some(field) = multipart.next_field().await? {
        match field.name().unwrap_or_default() {
            "media" | "image" => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await?;
                if !bytes.is_empty() {
                    upload = Some((name, bytes.to_vec()));
                }
            }
            "caption" => caption = field.text().await?,
            _ => {}
        }
    }

    let (file_name, bytes) = upload.ok_or_else(|| {
        ApiError::Validation("a media file is required".to_string())
    })?;
    let reference = media::save_media(&file_name, &bytes).await?;

    let mut conn = pool.get().await?;
    let result = diesel::insert_into(stories::table)
        .values(&NewStory {
            user_id: user.id,
            media: reference.clone(),
            caption: caption.trim().to_string(),
            expires_at: (Utc::now() + Duration::hours(STORY_TTL_HOURS)).naive_utc(),
        })
        .get_result::<Story>(&mut conn)
        .await;

    match result {
        Ok(story) => Ok(Json(story)),
        Err(e) => {
            // Do not leave the uploaded file orphaned on a failed insert
            if let Err(io) = media::remove_media(&reference).await {
                warn!("could not remove orphaned upload {reference}: {io}");
            }
            Err(e.into())
        }
    }
}

async fn author_image(
    conn: &mut AsyncPgConnection,
    user_id: i32,
) -> Result<Option<String>, ApiError> {
    Ok(users::table
        .find(user_id)
        .select(users::profile_image)
        .first(conn)
        .await?)
}

/// Decorate raw post rows for the requesting user: like state, hashtags
/// and (for the feed) the full comment threads in posting order.
async fn load_post_views(
    conn: &mut AsyncPgConnection,
    viewer_id: i32,
    rows: Vec<(Post, String, Option<String>)>,
    include_comments: bool,
) -> Result<Vec<PostView>, ApiError> {
    let post_ids: Vec<i32> = rows.iter().map(|(p, _, _)| p.id).collect();

    let liked: Vec<i32> = post_likes::table
        .filter(post_likes::user_id.eq(viewer_id))
        .filter(post_likes::post_id.eq_any(&post_ids))
        .select(post_likes::post_id)
        .load(conn)
        .await?;

    let mut hashtags: HashMap<i32, Vec<String>> = HashMap::new();
    for (post_id, hashtag) in post_hashtags::table
        .filter(post_hashtags::post_id.eq_any(&post_ids))
        .select((post_hashtags::post_id, post_hashtags::hashtag))
        .load::<(i32, String)>(conn)
        .await?
    {
        hashtags.entry(post_id).or_default().push(hashtag);
    }

    let mut threads: HashMap<i32, Vec<CommentView>> = HashMap::new();
    if include_comments {
        let comment_rows: Vec<(Comment, String, Option<String>)> = comments::table
            .inner_join(users::table)
            .filter(comments::post_id.eq_any(&post_ids))
            .order(comments::created_at.asc())
            .select((Comment::as_select(), users::username, users::profile_image))
            .load(conn)
            .await?;

        for (comment, username, profile_image) in comment_rows {
            threads.entry(comment.post_id).or_default().push(CommentView {
                id: comment.id,
                post_id: comment.post_id,
                user_id: comment.user_id,
                username,
                profile_image,
                body: comment.body,
                created_at: comment.created_at,
            });
        }
    }

    Ok(rows
        .into_iter()
        .map(|(post, username, profile_image)| PostView {
            is_liked: liked.contains(&post.id),
            hashtags: hashtags.remove(&post.id).unwrap_or_default(),
            comments: if include_comments {
                Some(threads.remove(&post.id).unwrap_or_default())
            } else {
                None
            },
            id: post.id,
            user_id: post.user_id,
            username,
            profile_image,
            media: post.media,
            caption: post.caption,
            likes_count: post.likes_count,
            comments_count: post.comments_count,
            created_at: post.created_at,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn story_row(id: i32, user_id: i32, minute: u32) -> (Story, String, Option<String>) {
        let created_at = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, minute, 0)
            .unwrap();
        (
            Story {
                id,
                user_id,
                media: format!("/uploads/{id}.jpg"),
                caption: String::new(),
                created_at,
                expires_at: created_at + Duration::hours(STORY_TTL_HOURS),
            },
            format!("user{user_id}"),
            None,
        )
    }

    #[test]
    fn authors_with_several_active_stories_keep_all_of_them() {
        // Newest first, author 1 twice
        let rows = vec![story_row(3, 1, 30), story_row(2, 2, 20), story_row(1, 1, 10)];

        let views = story_views(rows);

        assert_eq!(views.len(), 3);
        assert_eq!(views.iter().filter(|v| v.user_id == 1).count(), 2);
        let ids: Vec<i32> = views.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
