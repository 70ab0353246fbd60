pub mod command;
pub mod config;
pub mod discord;
pub mod eligibility;
pub mod events;
pub mod github;
pub mod interactions;
pub mod projection;
pub mod recovery;
pub mod stats;
pub mod store;
pub mod testing;
pub mod threads;
pub mod webhook;

use std::sync::Arc;

use discord::DiscordApi;
use github::GitHubApi;
use store::BountyStore;

/// Shared handles, constructed once at startup and passed into every
/// component. Nothing here holds entity state: reads always go back to
/// the store.
pub struct AppState {
    pub store: Arc<dyn BountyStore>,
    pub github: Arc<dyn GitHubApi>,
    pub discord: Arc<dyn DiscordApi>,
    pub webhook_secret: String,
    pub discord_public_key: String,
    /// Channel the bounty threads are created under.
    pub bounty_channel_id: String,
}
