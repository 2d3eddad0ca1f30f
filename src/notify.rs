//! Best-effort notification emission.
//!
//! Notifications are a side effect of an already-committed primary action;
//! a failure to record one must never fail or roll back that action. Every
//! helper here therefore runs in its own transaction scope and swallows
//! errors after logging them.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::warn;

use crate::db::DbPool;
use crate::models::notification::{NewNotification, NotificationKind};
use crate::schema::{followers, notifications};

/// Insert a single notification, skipping self-directed ones.
pub async fn emit(pool: &DbPool, notification: NewNotification) {
    if notification.actor_id == Some(notification.user_id) {
        return;
    }
    emit_many(pool, vec![notification]).await;
}

/// Insert a batch of notifications (e.g. new-post fan-out to followers).
pub async fn emit_many(pool: &DbPool, notifications: Vec<NewNotification>) {
    if notifications.is_empty() {
        return;
    }

    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("notification emission skipped, no connection: {e}");
            return;
        }
    };

    if let Err(e) = diesel::insert_into(notifications::table)
        .values(&notifications)
        .execute(&mut conn)
        .await
    {
        warn!("failed to write {} notification(s): {e}", notifications.len());
    }
}

/// Notify an author's followers about a new post. The audience lookup is
/// part of the best-effort path: the post already stands, so any failure
/// here is logged and swallowed like the inserts themselves.
pub async fn fan_out_post(pool: &DbPool, author_id: i32, author_username: &str, post_id: i32) {
    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("post fan-out skipped, no connection: {e}");
            return;
        }
    };

    let audience: Vec<i32> = match followers::table
        .filter(followers::following_id.eq(author_id))
        .select(followers::follower_id)
        .load(&mut conn)
        .await
    {
        Ok(ids) => ids,
        Err(e) => {
            warn!("post fan-out skipped, audience lookup failed: {e}");
            return;
        }
    };
    drop(conn);

    emit_many(pool, post_notifications(author_id, author_username, post_id, audience)).await;
}

fn post_notifications(
    author_id: i32,
    author_username: &str,
    post_id: i32,
    follower_ids: Vec<i32>,
) -> Vec<NewNotification> {
    follower_ids
        .into_iter()
        .map(|follower_id| NewNotification {
            user_id: follower_id,
            kind: NotificationKind::Post.as_str().to_string(),
            actor_id: Some(author_id),
            actor_username: author_username.to_string(),
            post_id: Some(post_id),
            message_id: None,
            body: format!("{author_username} shared a new post"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_fan_out_targets_each_follower_once() {
        let batch = post_notifications(1, "alice", 42, vec![2, 3, 5]);

        assert_eq!(batch.len(), 3);
        let targets: Vec<i32> = batch.iter().map(|n| n.user_id).collect();
        assert_eq!(targets, vec![2, 3, 5]);
        for n in &batch {
            assert_eq!(n.kind, "post");
            assert_eq!(n.actor_id, Some(1));
            assert_eq!(n.post_id, Some(42));
        }
    }

    #[test]
    fn post_fan_out_with_no_followers_is_empty() {
        assert!(post_notifications(1, "alice", 42, Vec::new()).is_empty());
    }
}
