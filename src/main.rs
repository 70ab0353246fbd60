use anyhow::Result;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use bountyhub::config::Config;
use bountyhub::discord::DiscordClient;
use bountyhub::github::GitHubClient;
use bountyhub::interactions::interactions_router;
use bountyhub::store::SqliteStore;
use bountyhub::webhook::webhook_router;
use bountyhub::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "bountyhub"
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting bountyhub sync engine");

    let config = Config::from_env().expect("Failed to load configuration from environment");

    let github_client = GitHubClient::new(config.github_app_id, config.github_private_key.clone());
    let discord_client = DiscordClient::new(config.discord_token.clone());

    let db_path = config.state_dir.join("bountyhub.db");
    info!("Using state database: {}", db_path.display());
    let store = SqliteStore::new(&db_path).expect("Failed to initialize SQLite database");

    let app_state = Arc::new(AppState {
        store: Arc::new(store),
        github: Arc::new(github_client),
        discord: Arc::new(discord_client),
        webhook_secret: config.github_webhook_secret.clone(),
        discord_public_key: config.discord_public_key.clone(),
        bounty_channel_id: config.discord_channel_id.clone(),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(webhook_router(app_state.clone()))
        .merge(interactions_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state.clone());

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
