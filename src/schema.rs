// Diesel table definitions; the authoritative DDL lives in migrations/.

use diesel::allow_tables_to_appear_in_same_query;
use diesel::joinable;
use diesel::sql_function;
use diesel::table;

sql_function! {
    /// Postgres LOWER(), used for case-insensitive email/username matching.
    fn lower(x: diesel::sql_types::Text) -> diesel::sql_types::Text;
}

table! {
    users (id) {
        id -> Integer,
        email -> Varchar,
        username -> Varchar,
        full_name -> Varchar,
        password_hash -> Varchar,
        bio -> Nullable<Text>,
        profile_image -> Nullable<Varchar>,
        birthday -> Nullable<Date>,
        is_admin -> Bool,
        is_online -> Bool,
        last_seen -> Timestamp,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

table! {
    followers (id) {
        id -> Integer,
        follower_id -> Integer,
        following_id -> Integer,
        created_at -> Timestamp,
    }
}

table! {
    posts (id) {
        id -> Integer,
        user_id -> Integer,
        media -> Varchar,
        caption -> Text,
        likes_count -> Integer,
        comments_count -> Integer,
        created_at -> Timestamp,
    }
}

table! {
    post_hashtags (id) {
        id -> Integer,
        post_id -> Integer,
        hashtag -> Varchar,
    }
}

table! {
    post_likes (id) {
        id -> Integer,
        post_id -> Integer,
        user_id -> Integer,
        created_at -> Timestamp,
    }
}

table! {
    comments (id) {
        id -> Integer,
        post_id -> Integer,
        user_id -> Integer,
        body -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

table! {
    stories (id) {
        id -> Integer,
        user_id -> Integer,
        media -> Varchar,
        caption -> Text,
        created_at -> Timestamp,
        expires_at -> Timestamp,
    }
}

table! {
    messages (id) {
        id -> Integer,
        sender_id -> Nullable<Integer>,
        sender_username -> Varchar,
        receiver_id -> Nullable<Integer>,
        receiver_username -> Varchar,
        body -> Text,
        is_read -> Bool,
        created_at -> Timestamp,
    }
}

table! {
    notifications (id) {
        id -> Integer,
        user_id -> Integer,
        kind -> Varchar,
        actor_id -> Nullable<Integer>,
        actor_username -> Varchar,
        post_id -> Nullable<Integer>,
        message_id -> Nullable<Integer>,
        body -> Text,
        is_read -> Bool,
        created_at -> Timestamp,
    }
}

joinable!(posts -> users (user_id));
joinable!(post_hashtags -> posts (post_id));
joinable!(post_likes -> posts (post_id));
joinable!(comments -> posts (post_id));
joinable!(comments -> users (user_id));
joinable!(stories -> users (user_id));

allow_tables_to_appear_in_same_query!(
    users,
    followers,
    posts,
    post_hashtags,
    post_likes,
    comments,
    stories,
    messages,
    notifications,
);
