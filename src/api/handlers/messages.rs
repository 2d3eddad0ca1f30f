//! Direct messages, conversation listing and presence.

use axum::extract::{Path, Query, State};
use axum::Json;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde_json::json;
use std::collections::HashMap;

use crate::auth::AuthUser;
use crate::db::DbPool;
use crate::error::ApiError;
use crate::models::message::{
    fold_conversations, ConversationView, LastMessageView, Message, NewMessage, SendMessagePayload,
};
use crate::models::notification::{NewNotification, NotificationKind};
use crate::models::user::{SearchQuery, User, UserSearchResult};
use crate::notify;
use crate::schema::{followers, messages, users};

const SEARCH_LIMIT: usize = 20;

/// POST /api/messages
pub async fn send_message(
    State(pool): State<DbPool>,
    user: AuthUser,
    Json(payload): Json<SendMessagePayload>,
) -> Result<Json<Message>, ApiError> {
    let receiver_id = payload
        .receiver_id
        .ok_or_else(|| ApiError::Validation("receiver is required".to_string()))?;
    let body = payload
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Validation("message text is required".to_string()))?
        .to_string();

    if receiver_id == user.id {
        return Err(ApiError::Validation("cannot message yourself".to_string()));
    }

    let mut conn = pool.get().await?;

    let receiver: User = users::table
        .find(receiver_id)
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("recipient not found".to_string()))?;

    let message: Message = diesel::insert_into(messages::table)
        .values(&NewMessage {
            sender_id: Some(user.id),
            sender_username: user.username.clone(),
            receiver_id: Some(receiver.id),
            receiver_username: receiver.username.clone(),
            body,
        })
        .get_result(&mut conn)
        .await?;

    notify::emit(
        &pool,
        NewNotification {
            user_id: receiver.id,
            kind: NotificationKind::Message.as_str().to_string(),
            actor_id: Some(user.id),
            actor_username: user.username.clone(),
            post_id: None,
            message_id: Some(message.id),
            body: format!("{} sent you a message", user.username),
        },
    )
    .await;

    Ok(Json(message))
}

/// GET /api/messages/conversations
///
/// One entry per counterpart the caller has message history with, newest
/// activity first. Counterparts whose accounts were deleted still appear,
/// under their stored username.
pub async fn get_conversations(
    State(pool): State<DbPool>,
    user: AuthUser,
) -> Result<Json<Vec<ConversationView>>, ApiError> {
    let mut conn = pool.get().await?;

    let history: Vec<Message> = messages::table
        .filter(
            messages::sender_id
                .eq(user.id)
                .or(messages::receiver_id.eq(user.id)),
        )
        .order(messages::created_at.desc())
        .load(&mut conn)
        .await?;

    let seeds = fold_conversations(user.id, &history);

    let counterpart_ids: Vec<i32> = seeds.iter().filter_map(|s| s.counterpart_id).collect();
    let counterparts: HashMap<i32, User> = users::table
        .filter(users::id.eq_any(&counterpart_ids))
        .load::<User>(&mut conn)
        .await?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    let views = seeds
        .into_iter()
        .map(|seed| {
            let counterpart = seed.counterpart_id.and_then(|id| counterparts.get(&id));
            ConversationView {
                user_id: counterpart.map(|u| u.id),
                username: counterpart
                    .map(|u| u.username.clone())
                    .unwrap_or(seed.counterpart_username),
                profile_image: counterpart.and_then(|u| u.profile_image.clone()),
                is_online: counterpart.map(|u| u.is_online).unwrap_or(false),
                last_seen: counterpart.map(|u| u.last_seen),
                last_message: LastMessageView {
                    text: seed.last_body,
                    created_at: seed.last_at,
                    is_read: seed.last_is_read,
                    is_sender: seed.last_from_me,
                },
                unread_count: seed.unread_count,
            }
        })
        .collect();

    Ok(Json(views))
}

/// GET /api/messages/:user_id
///
/// Full history with one counterpart, oldest first. Viewing the thread
/// marks their messages to the caller as read.
pub async fn get_messages(
    State(pool): State<DbPool>,
    user: AuthUser,
    Path(other_id): Path<i32>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let mut conn = pool.get().await?;

    let history: Vec<Message> = messages::table
        .filter(
            messages::sender_id
                .eq(user.id)
                .and(messages::receiver_id.eq(other_id))
                .or(messages::sender_id
                    .eq(other_id)
                    .and(messages::receiver_id.eq(user.id))),
        )
        .order(messages::created_at.asc())
        .load(&mut conn)
        .await?;

    mark_thread_read(&mut conn, user.id, other_id).await?;

    Ok(Json(history))
}

/// PUT /api/messages/read/:user_id
pub async fn mark_read(
    State(pool): State<DbPool>,
    user: AuthUser,
    Path(other_id): Path<i32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = pool.get().await?;
    let updated = mark_thread_read(&mut conn, user.id, other_id).await?;
    Ok(Json(json!({ "updated": updated })))
}

async fn mark_thread_read(
    conn: &mut AsyncPgConnection,
    reader_id: i32,
    sender_id: i32,
) -> Result<usize, ApiError> {
    Ok(diesel::update(
        messages::table
            .filter(messages::sender_id.eq(sender_id))
            .filter(messages::receiver_id.eq(reader_id))
            .filter(messages::is_read.eq(false)),
    )
    .set(messages::is_read.eq(true))
    .execute(conn)
    .await?)
}

/// GET /api/messages/unread-count
pub async fn unread_count(
    State(pool): State<DbPool>,
    user: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = pool.get().await?;

    let count: i64 = messages::table
        .filter(messages::receiver_id.eq(user.id))
        .filter(messages::is_read.eq(false))
        .count()
        .get_result(&mut conn)
        .await?;

    Ok(Json(json!({ "count": count })))
}

/// PUT /api/messages/online
pub async fn set_online(
    State(pool): State<DbPool>,
    user: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    super::auth::set_presence(&pool, &user, true).await?;
    Ok(Json(json!({ "online": true })))
}

/// PUT /api/messages/offline
pub async fn set_offline(
    State(pool): State<DbPool>,
    user: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    super::auth::set_presence(&pool, &user, false).await?;
    Ok(Json(json!({ "online": false })))
}

/// GET /api/messages/search/users?q=
///
/// Recipient picker. Unlike profile search, accounts the caller already
/// follows rank first.
pub async fn search_messaging_users(
    State(pool): State<DbPool>,
    user: AuthUser,
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
        .filter(users::id.ne(user.id))
        .load(&mut conn)
        .await?;

    let ids: Vec<i32> = candidates.iter().map(|u| u.id).collect();
    let followed: Vec<i32> = followers::table
        .filter(followers::follower_id.eq(user.id))
        .filter(followers::following_id.eq_any(&ids))
        .select(followers::following_id)
        .load(&mut conn)
        .await?;
    let follower_counts: HashMap<i32, i64> = followers::table
        .filter(followers::following_id.eq_any(&ids))
        .group_by(followers::following_id)
        .select((followers::following_id, diesel::dsl::count_star()))
        .load::<(i32, i64)>(&mut conn)
        .await?
        .into_iter()
        .collect();

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

    results.sort_by(|a, b| {
        b.is_following
            .cmp(&a.is_following)
            .then(a.username.cmp(&b.username))
    });
    results.truncate(SEARCH_LIMIT);

    Ok(Json(results))
}
