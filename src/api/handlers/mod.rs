pub mod admin;
pub mod auth;
pub mod health;
pub mod messages;
pub mod notifications;
pub mod posts;
pub mod profiles;
