//! Wire types for inbound GitHub webhook payloads.
//!
//! Every field that is not guaranteed across event types is optional; the
//! handlers check for what they need and skip otherwise.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebhookPayload {
    pub action: Option<String>,
    pub issue: Option<IssuePayload>,
    pub comment: Option<CommentPayload>,
    pub repository: Option<RepositoryPayload>,
    pub organization: Option<OrganizationPayload>,
    pub sender: Option<UserPayload>,
    pub installation: Option<InstallationPayload>,
    pub pull_request: Option<PullRequestPayload>,
    pub assignee: Option<UserPayload>,
    pub member: Option<UserPayload>,
    /// `installation.created` lists the repositories the app was installed on.
    pub repositories: Option<Vec<InstallationRepositoryPayload>>,
    /// `installation_repositories.added`.
    pub repositories_added: Option<Vec<InstallationRepositoryPayload>>,
    /// `installation_repositories.removed`.
    pub repositories_removed: Option<Vec<InstallationRepositoryPayload>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserPayload {
    pub login: String,
    pub id: Option<u64>,
    pub node_id: Option<String>,
    pub avatar_url: Option<String>,
    /// "User" or "Organization".
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelPayload {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuePayload {
    pub id: u64,
    pub node_id: Option<String>,
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub html_url: Option<String>,
    pub state: String,
    pub user: Option<UserPayload>,
    #[serde(default)]
    pub assignees: Vec<UserPayload>,
    #[serde(default)]
    pub labels: Vec<LabelPayload>,
    pub created_at: Option<DateTime<Utc>>,
    /// Present when the "issue" is really a pull request (comment events).
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentPayload {
    pub id: u64,
    pub body: String,
    pub user: UserPayload,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryPayload {
    pub id: u64,
    pub node_id: Option<String>,
    pub name: String,
    pub full_name: String,
    pub html_url: Option<String>,
    #[serde(default)]
    pub private: bool,
    pub stargazers_count: Option<u64>,
    pub forks_count: Option<u64>,
    pub owner: Option<UserPayload>,
}

impl RepositoryPayload {
    pub fn is_organization_owned(&self) -> bool {
        self.owner
            .as_ref()
            .and_then(|owner| owner.kind.as_deref())
            .is_some_and(|kind| kind.eq_ignore_ascii_case("organization"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationPayload {
    pub id: u64,
    pub node_id: Option<String>,
    pub login: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationPayload {
    pub id: u64,
    pub account: Option<UserPayload>,
}

/// Abbreviated repository shape carried by installation events.
#[derive(Debug, Clone, Deserialize)]
pub struct InstallationRepositoryPayload {
    pub id: u64,
    pub node_id: Option<String>,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestPayload {
    pub id: u64,
    pub node_id: Option<String>,
    pub number: u64,
    pub title: String,
    pub html_url: Option<String>,
    pub state: String,
    pub merged: Option<bool>,
    pub merged_at: Option<DateTime<Utc>>,
    pub user: Option<UserPayload>,
    #[serde(default)]
    pub assignees: Vec<UserPayload>,
    #[serde(default)]
    pub requested_reviewers: Vec<UserPayload>,
    #[serde(default)]
    pub labels: Vec<LabelPayload>,
}

/// Stable external id: the GraphQL node id when present, the numeric id
/// rendered as a string otherwise.
pub fn external_id(node_id: &Option<String>, id: u64) -> String {
    match node_id {
        Some(node_id) if !node_id.is_empty() => node_id.clone(),
        _ => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_issue_comment_payload() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "action": "created",
            "comment": {
                "id": 9001,
                "body": "/price 100",
                "user": { "login": "octo", "id": 1 }
            },
            "issue": {
                "id": 42,
                "node_id": "I_abc",
                "number": 7,
                "title": "Widget is broken",
                "state": "open"
            },
            "repository": {
                "id": 500,
                "node_id": "R_abc",
                "name": "widget",
                "full_name": "acme/widget",
                "private": false,
                "owner": { "login": "acme", "id": 99, "type": "Organization" }
            },
            "sender": { "login": "octo", "id": 1 },
            "installation": { "id": 12345 }
        }))
        .unwrap();

        assert_eq!(payload.action.as_deref(), Some("created"));
        assert_eq!(payload.comment.unwrap().body, "/price 100");
        let repository = payload.repository.unwrap();
        assert!(repository.is_organization_owned());
        assert_eq!(external_id(&repository.node_id, repository.id), "R_abc");
    }

    #[test]
    fn external_id_falls_back_to_numeric() {
        assert_eq!(external_id(&None, 42), "42");
        assert_eq!(external_id(&Some(String::new()), 42), "42");
        assert_eq!(external_id(&Some("I_x".into()), 42), "I_x");
    }

    #[test]
    fn user_owned_repository_is_not_organization_owned() {
        let repository: RepositoryPayload = serde_json::from_value(json!({
            "id": 1,
            "name": "dotfiles",
            "full_name": "alice/dotfiles",
            "owner": { "login": "alice", "type": "User" }
        }))
        .unwrap();
        assert!(!repository.is_organization_owned());
    }
}
