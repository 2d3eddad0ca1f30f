//! Notification inbox.

use axum::extract::State;
use axum::Json;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::json;
use std::collections::HashMap;

use crate::auth::AuthUser;
use crate::db::DbPool;
use crate::error::ApiError;
use crate::models::notification::{Notification, NotificationView};
use crate::schema::{notifications, users};

const LIST_LIMIT: i64 = 50;

/// GET /api/notifications
pub async fn list(
    State(pool): State<DbPool>,
    user: AuthUser,
) -> Result<Json<Vec<NotificationView>>, ApiError> {
    let mut conn = pool.get().await?;

    let rows: Vec<Notification> = notifications::table
        .filter(notifications::user_id.eq(user.id))
        .order(notifications::created_at.desc())
        .limit(LIST_LIMIT)
        .load(&mut conn)
        .await?;

    // Actor avatars are resolved at read time; a deleted actor simply has
    // no image and keeps the stored username.
    let actor_ids: Vec<i32> = rows.iter().filter_map(|n| n.actor_id).collect();
    let actor_images: HashMap<i32, Option<String>> = users::table
        .filter(users::id.eq_any(&actor_ids))
        .select((users::id, users::profile_image))
        .load::<(i32, Option<String>)>(&mut conn)
        .await?
        .into_iter()
        .collect();

    let views = rows
        .into_iter()
        .map(|n| NotificationView {
            actor_image: n.actor_id.and_then(|id| actor_images.get(&id).cloned()).flatten(),
            id: n.id,
            kind: n.kind,
            actor_id: n.actor_id,
            actor_username: n.actor_username,
            post_id: n.post_id,
            message_id: n.message_id,
            body: n.body,
            is_read: n.is_read,
            created_at: n.created_at,
        })
        .collect();

    Ok(Json(views))
}

/// PUT /api/notifications/read
pub async fn mark_all_read(
    State(pool): State<DbPool>,
    user: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = pool.get().await?;

    let updated = diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user.id))
            .filter(notifications::is_read.eq(false)),
    )
    .set(notifications::is_read.eq(true))
    .execute(&mut conn)
    .await?;

    Ok(Json(json!({ "updated": updated })))
}
