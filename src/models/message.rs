use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::messages;

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: i32,
    pub sender_id: Option<i32>,
    pub sender_username: String,
    pub receiver_id: Option<i32>,
    pub receiver_username: String,
    pub body: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub sender_id: Option<i32>,
    pub sender_username: String,
    pub receiver_id: Option<i32>,
    pub receiver_username: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessagePayload {
    pub receiver_id: Option<i32>,
    pub text: Option<String>,
}

/// Conversation list entry: one row per distinct counterpart the user has
/// exchanged messages with.
#[derive(Debug, Serialize)]
pub struct ConversationView {
    /// Counterpart id; None when the account has been deleted.
    pub user_id: Option<i32>,
    pub username: String,
    pub profile_image: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<NaiveDateTime>,
    pub last_message: LastMessageView,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct LastMessageView {
    pub text: String,
    pub created_at: NaiveDateTime,
    pub is_read: bool,
    pub is_sender: bool,
}

/// Per-counterpart aggregate derived from the raw message history.
#[derive(Debug)]
pub struct ConversationSeed {
    pub counterpart_id: Option<i32>,
    pub counterpart_username: String,
    pub last_body: String,
    pub last_at: NaiveDateTime,
    pub last_is_read: bool,
    pub last_from_me: bool,
    pub unread_count: i64,
}

/// Fold a user's message history (ordered newest first) into one seed per
/// counterpart. Deleted counterparts are keyed by their stored username.
pub fn fold_conversations(user_id: i32, newest_first: &[Message]) -> Vec<ConversationSeed> {
    let mut seeds: Vec<ConversationSeed> = Vec::new();

    for msg in newest_first {
        let from_me = msg.sender_id == Some(user_id);
        let (counterpart_id, counterpart_username) = if from_me {
            (msg.receiver_id, msg.receiver_username.clone())
        } else {
            (msg.sender_id, msg.sender_username.clone())
        };

        let unread = !from_me && msg.receiver_id == Some(user_id) && !msg.is_read;

        match seeds.iter_mut().find(|s| match (s.counterpart_id, counterpart_id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => s.counterpart_username == counterpart_username,
            _ => false,
        }) {
            Some(seed) => {
                if unread {
                    seed.unread_count += 1;
                }
            }
            None => seeds.push(ConversationSeed {
                counterpart_id,
                counterpart_username,
                last_body: msg.body.clone(),
                last_at: msg.created_at,
                last_is_read: msg.is_read,
                last_from_me: from_me,
                unread_count: if unread { 1 } else { 0 },
            }),
        }
    }

    seeds
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn msg(
        id: i32,
        sender: i32,
        receiver: i32,
        body: &str,
        is_read: bool,
        minute: u32,
    ) -> Message {
        Message {
            id,
            sender_id: Some(sender),
            sender_username: format!("user{sender}"),
            receiver_id: Some(receiver),
            receiver_username: format!("user{receiver}"),
            body: body.to_string(),
            is_read,
            created_at: NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(12, minute, 0)
                .unwrap(),
        }
    }

    #[test]
    fn one_seed_per_counterpart_with_latest_message_first() {
        // History newest first: 2->1 ("hey again"), 1->2, 3->1
        let history = vec![
            msg(3, 2, 1, "hey again", false, 30),
            msg(2, 1, 2, "hello", true, 20),
            msg(1, 3, 1, "yo", false, 10),
        ];

        let seeds = fold_conversations(1, &history);
        assert_eq!(seeds.len(), 2);

        assert_eq!(seeds[0].counterpart_id, Some(2));
        assert_eq!(seeds[0].last_body, "hey again");
        assert!(!seeds[0].last_from_me);
        assert_eq!(seeds[0].unread_count, 1);

        assert_eq!(seeds[1].counterpart_id, Some(3));
        assert_eq!(seeds[1].unread_count, 1);
    }

    #[test]
    fn unread_count_only_counts_messages_addressed_to_me() {
        let history = vec![
            msg(4, 2, 1, "d", false, 40),
            msg(3, 1, 2, "c", false, 30), // my own unread outbound, not counted
            msg(2, 2, 1, "b", false, 20),
            msg(1, 2, 1, "a", true, 10),
        ];

        let seeds = fold_conversations(1, &history);
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].unread_count, 2);
    }

    #[test]
    fn deleted_counterpart_keyed_by_stored_username() {
        let mut ghost = msg(2, 5, 1, "last words", false, 20);
        ghost.sender_id = None;
        ghost.sender_username = "ghost".to_string();
        let mut ghost2 = msg(1, 5, 1, "first words", true, 10);
        ghost2.sender_id = None;
        ghost2.sender_username = "ghost".to_string();

        let seeds = fold_conversations(1, &[ghost, ghost2]);
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].counterpart_id, None);
        assert_eq!(seeds[0].counterpart_username, "ghost");
        assert_eq!(seeds[0].last_body, "last words");
    }
}
