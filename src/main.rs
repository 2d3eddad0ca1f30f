use anyhow::Result;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lumagram::api;
use lumagram::auth;
use lumagram::config::Config;
use lumagram::db::init_database;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,lumagram=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::get();
    info!("Initialized configuration for {}:{}", config.server.host, config.server.port);

    // Initialize database
    let db = Arc::new(init_database().await?);
    info!("Connected to database");

    // Provision the admin account when configured
    auth::seed_admin(db.get_pool()).await?;

    // Start API server; runs until a shutdown signal arrives
    api::start_api_server(db).await?;

    info!("Shutdown complete");
    Ok(())
}
