use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::notifications;

/// Notification categories; stored as their string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Follow,
    Like,
    Comment,
    Post,
    Message,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Follow => "follow",
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Post => "post",
            NotificationKind::Message => "message",
        }
    }
}

#[derive(Debug, Queryable, Selectable, Serialize)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: i32,
    pub user_id: i32,
    pub kind: String,
    pub actor_id: Option<i32>,
    pub actor_username: String,
    pub post_id: Option<i32>,
    pub message_id: Option<i32>,
    pub body: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub user_id: i32,
    pub kind: String,
    pub actor_id: Option<i32>,
    pub actor_username: String,
    pub post_id: Option<i32>,
    pub message_id: Option<i32>,
    pub body: String,
}

/// Notification as listed to the client; the actor's avatar is resolved at
/// read time since it can change after the notification was written.
#[derive(Debug, Serialize)]
pub struct NotificationView {
    pub id: i32,
    pub kind: String,
    pub actor_id: Option<i32>,
    pub actor_username: String,
    pub actor_image: Option<String>,
    pub post_id: Option<i32>,
    pub message_id: Option<i32>,
    pub body: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}
