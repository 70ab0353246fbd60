//! Projections from raw GitHub payloads to the canonical record shapes.
//!
//! Two sources feed the same data model: live webhook payloads (REST
//! shapes) and the bulk recovery crawl (GraphQL shapes). Each gets its own
//! mapping function targeting the one canonical patch type, so shared
//! logic never branches on payload shape, and re-running recovery over
//! already-synced data is a no-op.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::events::payload::{
    external_id, IssuePayload, PullRequestPayload, RepositoryPayload, UserPayload,
};
use crate::store::records::{
    Assignee, IssuePatch, IssueState, PullRequestPatch, RepoRef, UserRef,
};

fn issue_state(raw: &str) -> IssueState {
    if raw.eq_ignore_ascii_case("closed") {
        IssueState::Closed
    } else {
        IssueState::Open
    }
}

fn user_ref(user: Option<&UserPayload>) -> UserRef {
    match user {
        Some(user) => UserRef {
            login: user.login.clone(),
            avatar_url: user.avatar_url.clone(),
        },
        // Deleted accounts come through as null; GitHub renders them as
        // the "ghost" user.
        None => UserRef::ghost(),
    }
}

fn assignee_now(login: String, avatar_url: Option<String>) -> Assignee {
    Assignee {
        login,
        avatar_url,
        rewarded: false,
        assigned_at: Utc::now(),
    }
}

/// Map a live webhook issue payload into the canonical issue patch.
pub fn issue_from_webhook(issue: &IssuePayload, repository: &RepositoryPayload) -> IssuePatch {
    IssuePatch {
        issue_id: external_id(&issue.node_id, issue.id),
        number: Some(issue.number),
        title: Some(issue.title.clone()),
        url: Some(issue.html_url.clone().unwrap_or_default()),
        description: issue.body.clone(),
        state: Some(issue_state(&issue.state)),
        labels: Some(issue.labels.iter().map(|l| l.name.clone()).collect()),
        created_at: issue.created_at,
        repository: Some(RepoRef {
            id: external_id(&repository.node_id, repository.id),
            name: repository.name.clone(),
        }),
        owner: Some(user_ref(repository.owner.as_ref())),
        assignees: Some(
            issue
                .assignees
                .iter()
                .map(|a| assignee_now(a.login.clone(), a.avatar_url.clone()))
                .collect(),
        ),
        managers: Some(vec![user_ref(issue.user.as_ref())]),
        private: Some(repository.private),
        ..Default::default()
    }
}

/// Map a live webhook pull-request payload into the canonical patch.
/// Linked issue numbers are resolved separately (GraphQL) and passed in.
pub fn pull_request_from_webhook(
    pull_request: &PullRequestPayload,
    repository: &RepositoryPayload,
    linked_issues: Vec<u64>,
) -> PullRequestPatch {
    PullRequestPatch {
        pull_request_id: external_id(&pull_request.node_id, pull_request.id),
        number: Some(pull_request.number),
        title: Some(pull_request.title.clone()),
        url: Some(pull_request.html_url.clone().unwrap_or_default()),
        state: Some(issue_state(&pull_request.state)),
        merged: Some(pull_request.merged.unwrap_or(false)),
        merged_at: pull_request.merged_at,
        linked_issues: Some(linked_issues),
        assignees: Some(
            pull_request
                .assignees
                .iter()
                .map(|a| a.login.clone())
                .collect(),
        ),
        requested_reviewers: Some(
            pull_request
                .requested_reviewers
                .iter()
                .map(|r| r.login.clone())
                .collect(),
        ),
        managers: Some(vec![user_ref(pull_request.user.as_ref())]),
        labels: Some(pull_request.labels.iter().map(|l| l.name.clone()).collect()),
        repository_id: Some(external_id(&repository.node_id, repository.id)),
    }
}

// ---------------------------------------------------------------------------
// Crawl (GraphQL) shapes
// ---------------------------------------------------------------------------

/// A `{ nodes: [...] }` connection, with absent connections collapsing to
/// an empty list (GraphQL returns null for e.g. collaborators the token
/// cannot see).
#[derive(Debug, Clone, Deserialize)]
pub struct NodeList<T> {
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
}

impl<T> Default for NodeList<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlActor {
    pub login: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlLabel {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlComment {
    pub body: String,
    pub author: Option<CrawlActor>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlIssue {
    pub id: String,
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub url: String,
    /// GraphQL reports "OPEN"/"CLOSED".
    pub state: String,
    pub created_at: Option<DateTime<Utc>>,
    pub author: Option<CrawlActor>,
    #[serde(default)]
    pub assignees: NodeList<CrawlActor>,
    #[serde(default)]
    pub labels: NodeList<CrawlLabel>,
    #[serde(default)]
    pub comments: NodeList<CrawlComment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlIssueRef {
    pub number: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlPullRequest {
    pub id: String,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    pub merged_at: Option<DateTime<Utc>>,
    pub author: Option<CrawlActor>,
    #[serde(default)]
    pub assignees: NodeList<CrawlActor>,
    #[serde(default)]
    pub labels: NodeList<CrawlLabel>,
    #[serde(default)]
    pub closing_issues_references: NodeList<CrawlIssueRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRepository {
    pub id: String,
    pub name: String,
    pub name_with_owner: String,
    pub url: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub stargazer_count: u64,
    #[serde(default)]
    pub fork_count: u64,
    #[serde(default)]
    pub collaborators: Option<NodeList<CrawlActor>>,
}

fn crawl_user_ref(actor: Option<&CrawlActor>) -> UserRef {
    match actor {
        Some(actor) => UserRef {
            login: actor.login.clone(),
            avatar_url: actor.avatar_url.clone(),
        },
        None => UserRef::ghost(),
    }
}

/// Map a crawled issue node into the canonical issue patch. Must agree
/// with [`issue_from_webhook`] for equivalent source data.
pub fn issue_from_crawl(
    issue: &CrawlIssue,
    repository: &CrawlRepository,
    owner: &UserRef,
) -> IssuePatch {
    IssuePatch {
        issue_id: issue.id.clone(),
        number: Some(issue.number),
        title: Some(issue.title.clone()),
        url: Some(issue.url.clone()),
        description: issue.body.clone(),
        state: Some(issue_state(&issue.state)),
        labels: Some(issue.labels.nodes.iter().map(|l| l.name.clone()).collect()),
        created_at: issue.created_at,
        repository: Some(RepoRef {
            id: repository.id.clone(),
            name: repository.name.clone(),
        }),
        owner: Some(owner.clone()),
        assignees: Some(
            issue
                .assignees
                .nodes
                .iter()
                .map(|a| assignee_now(a.login.clone(), a.avatar_url.clone()))
                .collect(),
        ),
        managers: Some(vec![crawl_user_ref(issue.author.as_ref())]),
        private: Some(repository.is_private),
        ..Default::default()
    }
}

/// Map a crawled pull-request node into the canonical patch.
pub fn pull_request_from_crawl(
    pull_request: &CrawlPullRequest,
    repository: &CrawlRepository,
) -> PullRequestPatch {
    PullRequestPatch {
        pull_request_id: pull_request.id.clone(),
        number: Some(pull_request.number),
        title: Some(pull_request.title.clone()),
        url: Some(pull_request.url.clone()),
        // GraphQL reports MERGED as its own state.
        state: Some(if pull_request.merged {
            IssueState::Closed
        } else {
            issue_state(&pull_request.state)
        }),
        merged: Some(pull_request.merged),
        merged_at: pull_request.merged_at,
        linked_issues: Some(
            pull_request
                .closing_issues_references
                .nodes
                .iter()
                .map(|issue| issue.number)
                .collect(),
        ),
        assignees: Some(
            pull_request
                .assignees
                .nodes
                .iter()
                .map(|a| a.login.clone())
                .collect(),
        ),
        requested_reviewers: Some(Vec::new()),
        managers: Some(vec![crawl_user_ref(pull_request.author.as_ref())]),
        labels: Some(
            pull_request
                .labels
                .nodes
                .iter()
                .map(|l| l.name.clone())
                .collect(),
        ),
        repository_id: Some(repository.id.clone()),
    }
}
