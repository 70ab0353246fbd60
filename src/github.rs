//! GitHub collaborator: App-authenticated REST and GraphQL client.
//!
//! The client authenticates as a GitHub App (RS256 JWT) and exchanges the
//! JWT for short-lived installation tokens, cached per installation with a
//! five-minute renewal buffer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{error, info};

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = "bountyhub";

/// Organization member with the role reported by GitHub.
#[derive(Debug, Clone)]
pub struct OrgMemberInfo {
    pub login: String,
    pub avatar_url: Option<String>,
    pub role: Option<String>,
}

/// Operations the sync engine needs from GitHub. Implemented by
/// [`GitHubClient`]; tests substitute a double.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Post a comment on an issue.
    async fn create_issue_comment(
        &self,
        installation_id: u64,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<()>;

    /// Full member roster of an organization, with roles.
    async fn organization_members(
        &self,
        installation_id: u64,
        org: &str,
    ) -> Result<Vec<OrgMemberInfo>>;

    /// Issue numbers a pull request closes, via the GraphQL
    /// closingIssuesReferences connection.
    async fn linked_issue_numbers(
        &self,
        installation_id: u64,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<u64>>;

    /// Raw GraphQL query; the recovery crawler builds its paginated
    /// queries on top of this.
    async fn graphql(
        &self,
        installation_id: u64,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value>;
}

#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    app_id: u64,
    private_key: String,
    token_cache: Arc<RwLock<HashMap<u64, (String, SystemTime)>>>,
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct MemberResponse {
    login: String,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MembershipResponse {
    role: String,
}

const LINKED_ISSUES_QUERY: &str = r#"
query linkedIssues($owner: String!, $repository: String!, $prNumber: Int!, $maxIssues: Int!) {
  repository(owner: $owner, name: $repository) {
    pullRequest(number: $prNumber) {
      closingIssuesReferences(first: $maxIssues) {
        nodes {
          number
        }
      }
    }
  }
}
"#;

impl GitHubClient {
    pub fn new(app_id: u64, private_key: String) -> Self {
        Self {
            client: Client::new(),
            app_id,
            private_key,
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn generate_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("failed to get current time")?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            iat: now - 60,  // account for clock skew
            exp: now + 600, // ten-minute lifetime
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("failed to parse GitHub App private key")?;

        encode(&header, &claims, &encoding_key).context("failed to encode JWT")
    }

    async fn installation_token(&self, installation_id: u64) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expires_at)) = cache.get(&installation_id) {
                if expires_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default()
                    > Duration::from_secs(300)
                {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!("{GITHUB_API}/app/installations/{installation_id}/access_tokens");

        info!("requesting new installation access token");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {jwt}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .context("failed to send installation token request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("installation token request failed: {status} - {body}");
            return Err(anyhow!("installation token request failed: {status}"));
        }

        let token_response: InstallationTokenResponse = response
            .json()
            .await
            .context("failed to parse installation token response")?;

        let expires_at = chrono::DateTime::parse_from_rfc3339(&token_response.expires_at)
            .map(|dt| UNIX_EPOCH + Duration::from_secs(dt.timestamp().max(0) as u64))
            .unwrap_or_else(|_| SystemTime::now() + Duration::from_secs(3600));

        self.token_cache
            .write()
            .await
            .insert(installation_id, (token_response.token.clone(), expires_at));

        Ok(token_response.token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        installation_id: u64,
        url: &str,
    ) -> Result<T> {
        let token = self.installation_token(installation_id).await?;
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("GET {url} failed: {status} - {body}"));
        }

        response
            .json()
            .await
            .with_context(|| format!("failed to parse response from {url}"))
    }
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn create_issue_comment(
        &self,
        installation_id: u64,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<()> {
        let token = self.installation_token(installation_id).await?;
        let url = format!("{GITHUB_API}/repos/{owner}/{repo}/issues/{issue_number}/comments");
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .json(&json!({ "body": body }))
            .send()
            .await
            .context("failed to send comment request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("comment creation failed: {status} - {body}"));
        }
        Ok(())
    }

    async fn organization_members(
        &self,
        installation_id: u64,
        org: &str,
    ) -> Result<Vec<OrgMemberInfo>> {
        let mut members = Vec::new();
        let mut page = 1u32;

        loop {
            let url =
                format!("{GITHUB_API}/orgs/{org}/members?per_page=100&page={page}");
            let batch: Vec<MemberResponse> = self.get_json(installation_id, &url).await?;
            if batch.is_empty() {
                break;
            }
            let done = batch.len() < 100;
            for member in batch {
                let membership_url =
                    format!("{GITHUB_API}/orgs/{org}/memberships/{}", member.login);
                let role = match self
                    .get_json::<MembershipResponse>(installation_id, &membership_url)
                    .await
                {
                    Ok(membership) => Some(membership.role),
                    Err(e) => {
                        error!("failed to fetch membership for {}: {e:#}", member.login);
                        None
                    }
                };
                members.push(OrgMemberInfo {
                    login: member.login,
                    avatar_url: member.avatar_url,
                    role,
                });
            }
            if done {
                break;
            }
            page += 1;
        }

        Ok(members)
    }

    async fn linked_issue_numbers(
        &self,
        installation_id: u64,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<u64>> {
        let data = self
            .graphql(
                installation_id,
                LINKED_ISSUES_QUERY,
                json!({
                    "owner": owner,
                    "repository": repo,
                    "prNumber": pr_number,
                    "maxIssues": 10,
                }),
            )
            .await?;

        let numbers = data
            .pointer("/repository/pullRequest/closingIssuesReferences/nodes")
            .and_then(|nodes| nodes.as_array())
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|node| node.get("number").and_then(|n| n.as_u64()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(numbers)
    }

    async fn graphql(
        &self,
        installation_id: u64,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let token = self.installation_token(installation_id).await?;
        let response = self
            .client
            .post(format!("{GITHUB_API}/graphql"))
            .header("Authorization", format!("Bearer {token}"))
            .header("User-Agent", USER_AGENT)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .context("failed to send GraphQL request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("GraphQL request failed: {status} - {body}"));
        }

        let mut envelope: serde_json::Value = response
            .json()
            .await
            .context("failed to parse GraphQL response")?;

        if let Some(errors) = envelope.get("errors") {
            if errors.as_array().is_some_and(|e| !e.is_empty()) {
                return Err(anyhow!("GraphQL query returned errors: {errors}"));
            }
        }

        Ok(envelope
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }
}
