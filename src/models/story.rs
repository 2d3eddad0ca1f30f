use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::stories;

/// Stories live for a fixed window after creation.
pub const STORY_TTL_HOURS: i64 = 24;

#[derive(Debug, Queryable, Selectable, Serialize)]
#[diesel(table_name = stories)]
pub struct Story {
    pub id: i32,
    pub user_id: i32,
    pub media: String,
    pub caption: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = stories)]
pub struct NewStory {
    pub user_id: i32,
    pub media: String,
    pub caption: String,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct StoryView {
    pub id: i32,
    pub user_id: i32,
    pub username: String,
    pub profile_image: Option<String>,
    pub media: String,
    pub caption: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
