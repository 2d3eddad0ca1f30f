use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::schema::{comments, post_hashtags, post_likes, posts};

#[derive(Debug, Queryable, Selectable, Serialize)]
#[diesel(table_name = posts)]
pub struct Post {
    pub id: i32,
    pub user_id: i32,
    pub media: String,
    pub caption: String,
    pub likes_count: i32,
    pub comments_count: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = posts)]
pub struct NewPost {
    pub user_id: i32,
    pub media: String,
    pub caption: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = post_hashtags)]
pub struct NewPostHashtag {
    pub post_id: i32,
    pub hashtag: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = post_likes)]
pub struct NewPostLike {
    pub post_id: i32,
    pub user_id: i32,
}

#[derive(Debug, Queryable, Selectable, Serialize)]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: i32,
    pub post_id: i32,
    pub user_id: i32,
    pub body: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    pub post_id: i32,
    pub user_id: i32,
    pub body: String,
}

/// Post as rendered in feed/profile/reels listings, annotated for the
/// requesting user.
#[derive(Debug, Serialize)]
pub struct PostView {
    pub id: i32,
    pub user_id: i32,
    pub username: String,
    pub profile_image: Option<String>,
    pub media: String,
    pub caption: String,
    pub likes_count: i32,
    pub comments_count: i32,
    pub is_liked: bool,
    pub hashtags: Vec<String>,
    pub created_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<CommentView>>,
}

#[derive(Debug, Serialize)]
pub struct CommentView {
    pub id: i32,
    pub post_id: i32,
    pub user_id: i32,
    pub username: String,
    pub profile_image: Option<String>,
    pub body: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
pub struct CommentPayload {
    pub text: String,
}

/// Decide a like toggle from the current edge state: the like state after
/// the toggle and the counter update that must accompany it in the same
/// transaction.
pub fn like_transition(currently_liked: bool) -> (bool, &'static str) {
    if currently_liked {
        // Clamp so a drifted counter can never go negative
        (false, "GREATEST(likes_count - 1, 0)")
    } else {
        (true, "likes_count + 1")
    }
}

/// How many comments each post loses when the given comment rows go away,
/// keyed by post id. Used to repair comments_count when an account and all
/// its comments are deleted.
pub fn comment_decrements(post_ids: impl IntoIterator<Item = i32>) -> HashMap<i32, i32> {
    let mut per_post = HashMap::new();
    for post_id in post_ids {
        *per_post.entry(post_id).or_insert(0) += 1;
    }
    per_post
}

/// Normalize a user-supplied hashtag string: split on commas/whitespace,
/// strip leading `#`, lowercase, drop empties and duplicates while keeping
/// first-seen order.
pub fn parse_hashtags(raw: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for token in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        let tag = token.trim_start_matches('#').to_lowercase();
        if !tag.is_empty() && !seen.contains(&tag) {
            seen.push(tag);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashtags_split_on_commas_and_whitespace() {
        assert_eq!(
            parse_hashtags("#sunset, beach  #Travel"),
            vec!["sunset", "beach", "travel"]
        );
    }

    #[test]
    fn hashtags_dedupe_keeping_order() {
        assert_eq!(
            parse_hashtags("cat #cat CAT dog"),
            vec!["cat", "dog"]
        );
    }

    #[test]
    fn empty_input_gives_no_hashtags() {
        assert!(parse_hashtags("").is_empty());
        assert!(parse_hashtags("  , # ,, ").is_empty());
    }

    #[test]
    fn like_toggle_twice_restores_starting_state() {
        let (liked, counter) = like_transition(false);
        assert!(liked);
        assert_eq!(counter, "likes_count + 1");

        let (liked, counter) = like_transition(liked);
        assert!(!liked);
        assert_eq!(counter, "GREATEST(likes_count - 1, 0)");
    }

    #[test]
    fn comment_decrements_group_by_post() {
        let per_post = comment_decrements([7, 7, 9, 7]);
        assert_eq!(per_post.len(), 2);
        assert_eq!(per_post[&7], 3);
        assert_eq!(per_post[&9], 1);
        assert!(comment_decrements([]).is_empty());
    }
}
