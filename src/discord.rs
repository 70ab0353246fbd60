//! Discord collaborator: REST client for threads, membership and messages.
//!
//! Only the handful of operations the thread coordinator needs; the wire
//! protocol itself stays Discord's problem.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const DISCORD_API: &str = "https://discord.com/api/v10";

/// Private thread, not joinable without an explicit invite.
const GUILD_PRIVATE_THREAD: u8 = 12;

/// Success button style for the confirm-receipt control.
const BUTTON_STYLE_SUCCESS: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedThread {
    pub id: String,
    pub name: String,
}

/// Operations the thread coordinator needs from Discord. Implemented by
/// [`DiscordClient`]; tests substitute a double.
#[async_trait]
pub trait DiscordApi: Send + Sync {
    /// Create a private thread under `channel_id` and return its identity.
    async fn create_private_thread(
        &self,
        channel_id: &str,
        name: &str,
        reason: &str,
    ) -> Result<CreatedThread>;

    async fn add_thread_member(&self, thread_id: &str, user_id: &str) -> Result<()>;

    async fn remove_thread_member(&self, thread_id: &str, user_id: &str) -> Result<()>;

    /// Plain text message into a thread or channel.
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()>;

    /// Message carrying a single interactive button; `custom_id` comes
    /// back on the interaction event when the button is clicked.
    async fn send_message_with_button(
        &self,
        channel_id: &str,
        content: &str,
        custom_id: &str,
        label: &str,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct DiscordClient {
    client: Client,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    id: String,
    name: String,
}

impl DiscordClient {
    pub fn new(token: String) -> Self {
        Self {
            client: Client::new(),
            token,
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(anyhow!("{what} failed: {status} - {body}"))
    }
}

#[async_trait]
impl DiscordApi for DiscordClient {
    async fn create_private_thread(
        &self,
        channel_id: &str,
        name: &str,
        reason: &str,
    ) -> Result<CreatedThread> {
        let response = self
            .client
            .post(format!("{DISCORD_API}/channels/{channel_id}/threads"))
            .header("Authorization", self.auth())
            .header("X-Audit-Log-Reason", reason)
            .json(&json!({
                "name": name,
                "type": GUILD_PRIVATE_THREAD,
                "invitable": false,
                "auto_archive_duration": 10080,
            }))
            .send()
            .await
            .context("failed to send thread creation request")?;
        let response = Self::check(response, "thread creation").await?;
        let channel: ChannelResponse = response
            .json()
            .await
            .context("failed to parse thread creation response")?;
        Ok(CreatedThread {
            id: channel.id,
            name: channel.name,
        })
    }

    async fn add_thread_member(&self, thread_id: &str, user_id: &str) -> Result<()> {
        let response = self
            .client
            .put(format!(
                "{DISCORD_API}/channels/{thread_id}/thread-members/{user_id}"
            ))
            .header("Authorization", self.auth())
            .send()
            .await
            .context("failed to send thread member add request")?;
        Self::check(response, "thread member add").await?;
        Ok(())
    }

    async fn remove_thread_member(&self, thread_id: &str, user_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!(
                "{DISCORD_API}/channels/{thread_id}/thread-members/{user_id}"
            ))
            .header("Authorization", self.auth())
            .send()
            .await
            .context("failed to send thread member remove request")?;
        Self::check(response, "thread member remove").await?;
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{DISCORD_API}/channels/{channel_id}/messages"))
            .header("Authorization", self.auth())
            .json(&json!({ "content": content }))
            .send()
            .await
            .context("failed to send message request")?;
        Self::check(response, "message send").await?;
        Ok(())
    }

    async fn send_message_with_button(
        &self,
        channel_id: &str,
        content: &str,
        custom_id: &str,
        label: &str,
    ) -> Result<()> {
        let response = self
            .client
            .post(format!("{DISCORD_API}/channels/{channel_id}/messages"))
            .header("Authorization", self.auth())
            .json(&json!({
                "content": content,
                "components": [{
                    "type": 1,
                    "components": [{
                        "type": 2,
                        "style": BUTTON_STYLE_SUCCESS,
                        "label": label,
                        "custom_id": custom_id,
                    }],
                }],
            }))
            .send()
            .await
            .context("failed to send button message request")?;
        Self::check(response, "button message send").await?;
        Ok(())
    }
}
