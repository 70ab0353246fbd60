//! Manual bulk recovery: crawl an organization's history into the mirror.
//!
//! Runs the same crawl that installation events trigger, for initial
//! onboarding or drift repair, without going through the server process.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};

use bountyhub::config::Config;
use bountyhub::discord::DiscordClient;
use bountyhub::github::GitHubClient;
use bountyhub::recovery::recover_organization;
use bountyhub::store::SqliteStore;
use bountyhub::AppState;

/// Re-synchronize an organization's repositories, issues and pull
/// requests from GitHub.
#[derive(Parser, Debug)]
#[command(name = "recover")]
struct Cli {
    /// Organization login to crawl
    organization: String,

    /// GitHub App installation id to authenticate with
    #[arg(long, env = "GITHUB_INSTALLATION_ID")]
    installation_id: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let db_path = config.state_dir.join("bountyhub.db");
    let store = SqliteStore::new(&db_path)?;

    let state = Arc::new(AppState {
        store: Arc::new(store),
        github: Arc::new(GitHubClient::new(
            config.github_app_id,
            config.github_private_key.clone(),
        )),
        discord: Arc::new(DiscordClient::new(config.discord_token.clone())),
        webhook_secret: config.github_webhook_secret.clone(),
        discord_public_key: config.discord_public_key.clone(),
        bounty_channel_id: config.discord_channel_id.clone(),
    });

    let summary = recover_organization(&state, cli.installation_id, &cli.organization).await?;
    info!("recovery of {} finished: {summary}", cli.organization);

    Ok(())
}
