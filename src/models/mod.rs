pub mod message;
pub mod notification;
pub mod post;
pub mod story;
pub mod user;
