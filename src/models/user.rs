use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::users;

#[derive(Debug, Queryable, Selectable, Serialize)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub username: String,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub bio: Option<String>,
    pub profile_image: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub is_admin: bool,
    pub is_online: bool,
    pub last_seen: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub password_hash: String,
    pub bio: Option<String>,
    pub profile_image: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub is_admin: bool,
}

/// Public profile view with aggregate counts and the caller's follow state.
#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub id: i32,
    pub username: String,
    pub full_name: String,
    pub bio: Option<String>,
    pub profile_image: Option<String>,
    pub followers: i64,
    pub following: i64,
    pub posts: i64,
    pub is_following: bool,
    pub created_at: NaiveDateTime,
}

/// Row in follower/following listings.
#[derive(Debug, Serialize)]
pub struct FollowDetail {
    pub id: i32,
    pub username: String,
    pub full_name: String,
    pub profile_image: Option<String>,
    pub followed_at: NaiveDateTime,
}

/// Row in user search results, decorated for the requesting user.
#[derive(Debug, Serialize)]
pub struct UserSearchResult {
    pub id: i32,
    pub username: String,
    pub full_name: String,
    pub profile_image: Option<String>,
    pub is_online: bool,
    pub follower_count: i64,
    pub is_following: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// Follow edge state after a toggle: present becomes absent and vice versa.
pub fn follow_transition(currently_following: bool) -> bool {
    !currently_following
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_toggle_twice_restores_starting_state() {
        let followed = follow_transition(false);
        assert!(followed);
        assert!(!follow_transition(followed));
    }
}
