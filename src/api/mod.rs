mod handlers;

use crate::config::Config;
use crate::db::Database;
use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Start the API server
pub async fn start_api_server(db: Arc<Database>) -> Result<()> {
    let config = Config::get();
    let pool = db.get_pool().clone();

    let cors = if config.server.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        // No-op layer; no CORS headers are emitted
        CorsLayer::new()
    };

    let app = Router::new()
        // General routes
        .route("/health", get(handlers::health::health_check))
        // Auth routes
        .route("/api/auth/signup", post(handlers::auth::signup))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/admin-login", post(handlers::auth::admin_login))
        // Post routes
        .route("/api/posts", post(handlers::posts::create_post))
        .route("/api/posts/feed", get(handlers::posts::get_feed))
        .route("/api/posts/reels", get(handlers::posts::get_reels))
        .route(
            "/api/posts/stories",
            get(handlers::posts::get_stories).post(handlers::posts::create_story),
        )
        .route("/api/posts/user/:username", get(handlers::posts::get_user_posts))
        .route("/api/posts/:id/like", post(handlers::posts::toggle_like))
        .route("/api/posts/:id/comments", post(handlers::posts::add_comment))
        .route(
            "/api/posts/comments/:id",
            put(handlers::posts::update_comment).delete(handlers::posts::delete_comment),
        )
        // Profile routes
        .route(
            "/api/profile",
            put(handlers::profiles::update_profile).delete(handlers::profiles::delete_own_account),
        )
        .route("/api/profile/search", get(handlers::profiles::search_users))
        .route(
            "/api/profile/follow/:username",
            post(handlers::profiles::toggle_follow),
        )
        .route("/api/profile/:username", get(handlers::profiles::get_profile))
        .route(
            "/api/profile/:username/followers",
            get(handlers::profiles::list_followers),
        )
        .route(
            "/api/profile/:username/following",
            get(handlers::profiles::list_following),
        )
        // Message routes
        .route(
            "/api/messages",
            post(handlers::messages::send_message),
        )
        .route(
            "/api/messages/conversations",
            get(handlers::messages::get_conversations),
        )
        .route(
            "/api/messages/unread-count",
            get(handlers::messages::unread_count),
        )
        .route(
            "/api/messages/search/users",
            get(handlers::messages::search_messaging_users),
        )
        .route("/api/messages/online", put(handlers::messages::set_online))
        .route("/api/messages/offline", put(handlers::messages::set_offline))
        .route("/api/messages/read/:user_id", put(handlers::messages::mark_read))
        .route("/api/messages/:user_id", get(handlers::messages::get_messages))
        // Notification routes
        .route("/api/notifications", get(handlers::notifications::list))
        .route(
            "/api/notifications/read",
            put(handlers::notifications::mark_all_read),
        )
        // Admin routes
        .route("/api/admin/users", get(handlers::admin::list_users))
        .route("/api/admin/users/:id", delete(handlers::admin::delete_user))
        .route("/api/admin/stats", get(handlers::admin::get_stats))
        .route(
            "/api/admin/users/:id/profile-image",
            post(handlers::admin::set_profile_image),
        )
        // Uploaded media is served straight off disk
        .nest_service("/uploads", ServeDir::new(&config.media.upload_dir))
        // Add state and middleware
        .with_state(pool)
        .layer(DefaultBodyLimit::max(config.media.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", config.server.host, config.server.port).parse::<SocketAddr>()?;

    info!("Starting API server on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
