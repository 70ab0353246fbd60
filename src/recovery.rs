//! Bulk recovery: crawl an organization's full history through GraphQL
//! and replay it through the same projection/upsert path as live events.
//!
//! Used for initial onboarding (installation events) and drift repair
//! (the `recover` binary). Pages are fetched sequentially; the per-issue
//! and per-PR projection work for each repository is fired as a detached
//! task so the crawl moves on to the next repository without waiting.
//! Re-running recovery over an unchanged organization is a no-op.

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::command::{parse_price_comment, PriceParse};
use crate::events::pull_requests::mark_issue_solved;
use crate::projection::{
    issue_from_crawl, pull_request_from_crawl, CrawlActor, CrawlIssue, CrawlPullRequest,
    CrawlRepository,
};
use crate::stats;
use crate::store::records::{
    IssuePatch, OrgMember, OrganizationPatch, OwnerType, RepositoryPatch, UserRef,
};
use crate::store::BountyStore;
use crate::AppState;

const ORGANIZATION_QUERY: &str = r#"
query organizationRoster($login: String!, $cursor: String) {
  organization(login: $login) {
    id
    login
    name
    avatarUrl
    membersWithRole(first: 100, after: $cursor) {
      edges {
        role
        node {
          login
          avatarUrl
        }
      }
      pageInfo {
        hasNextPage
        endCursor
      }
    }
  }
}
"#;

const REPOSITORIES_QUERY: &str = r#"
query organizationRepositories($login: String!, $cursor: String) {
  organization(login: $login) {
    repositories(first: 50, after: $cursor) {
      nodes {
        id
        name
        nameWithOwner
        url
        isPrivate
        stargazerCount
        forkCount
        collaborators(first: 100) {
          nodes {
            login
          }
        }
      }
      pageInfo {
        hasNextPage
        endCursor
      }
    }
  }
}
"#;

const ISSUES_QUERY: &str = r#"
query repositoryIssues($owner: String!, $name: String!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    issues(first: 50, after: $cursor) {
      nodes {
        id
        number
        title
        body
        url
        state
        createdAt
        author {
          login
          avatarUrl
        }
        assignees(first: 10) {
          nodes {
            login
            avatarUrl
          }
        }
        labels(first: 20) {
          nodes {
            name
          }
        }
        comments(first: 100) {
          nodes {
            body
            createdAt
            author {
              login
              avatarUrl
            }
          }
        }
      }
      pageInfo {
        hasNextPage
        endCursor
      }
    }
  }
}
"#;

const PULL_REQUESTS_QUERY: &str = r#"
query repositoryPullRequests($owner: String!, $name: String!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    pullRequests(first: 50, after: $cursor) {
      nodes {
        id
        number
        title
        url
        state
        merged
        mergedAt
        author {
          login
          avatarUrl
        }
        assignees(first: 10) {
          nodes {
            login
            avatarUrl
          }
        }
        labels(first: 20) {
          nodes {
            name
          }
        }
        closingIssuesReferences(first: 10) {
          nodes {
            number
          }
        }
      }
      pageInfo {
        hasNextPage
        endCursor
      }
    }
  }
}
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paged<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
    page_info: PageInfo,
}

#[derive(Debug, Clone, Deserialize)]
struct MemberEdge {
    role: Option<String>,
    node: CrawlActor,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberConnection {
    #[serde(default = "Vec::new")]
    edges: Vec<MemberEdge>,
    page_info: PageInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrganizationHeader {
    id: String,
    login: String,
    name: Option<String>,
    avatar_url: Option<String>,
    members_with_role: MemberConnection,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverySummary {
    pub repositories: usize,
    pub issues: usize,
    pub pull_requests: usize,
}

impl fmt::Display for RecoverySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} repositories, {} issues, {} pull requests",
            self.repositories, self.issues, self.pull_requests
        )
    }
}

/// Crawl the organization named `login` and mirror everything it owns.
pub async fn recover_organization(
    state: &Arc<AppState>,
    installation_id: u64,
    login: &str,
) -> Result<RecoverySummary> {
    info!("starting recovery crawl for organization {login}");

    let organization = sync_organization(state, installation_id, login).await?;
    let owner = UserRef {
        login: organization.login.clone(),
        avatar_url: organization.avatar_url.clone(),
    };

    let repositories = fetch_repositories(state, installation_id, login).await?;
    let mut summary = RecoverySummary {
        repositories: repositories.len(),
        ..Default::default()
    };

    let mut projections = JoinSet::new();
    for repository in repositories {
        sync_repository(state, installation_id, &owner, &repository).await?;

        let issues =
            fetch_issues(state, installation_id, login, &repository.name).await?;
        let pull_requests =
            fetch_pull_requests(state, installation_id, login, &repository.name).await?;
        summary.issues += issues.len();
        summary.pull_requests += pull_requests.len();

        // Project this repository's history without holding up the next
        // repository's fetches.
        let state = state.clone();
        let owner = owner.clone();
        projections.spawn(async move {
            if let Err(e) =
                project_repository(&state, &owner, &repository, issues, pull_requests).await
            {
                error!(
                    "recovery projection failed for {}: {e:#}",
                    repository.name_with_owner
                );
            }
        });
    }

    while projections.join_next().await.is_some() {}

    info!("recovery crawl for {login} complete: {summary}");
    Ok(summary)
}

/// Fetch org metadata plus the full member roster and upsert the record.
/// Acceptance state is deliberately left untouched.
async fn sync_organization(
    state: &Arc<AppState>,
    installation_id: u64,
    login: &str,
) -> Result<OrganizationHeader> {
    let mut cursor: Option<String> = None;
    let mut members: Vec<OrgMember> = Vec::new();
    let mut header: Option<OrganizationHeader> = None;

    loop {
        let data = state
            .github
            .graphql(
                installation_id,
                ORGANIZATION_QUERY,
                json!({ "login": login, "cursor": cursor }),
            )
            .await?;
        let page: OrganizationHeader = serde_json::from_value(
            data.get("organization")
                .cloned()
                .ok_or_else(|| anyhow!("organization {login} not found"))?,
        )
        .context("failed to parse organization page")?;

        for edge in &page.members_with_role.edges {
            members.push(OrgMember {
                login: edge.node.login.clone(),
                avatar_url: edge.node.avatar_url.clone(),
                role: edge.role.clone(),
                can_edit: false,
            });
        }

        let page_info = page.members_with_role.page_info.clone();
        header.get_or_insert(page);
        if !page_info.has_next_page {
            break;
        }
        cursor = page_info.end_cursor;
    }

    let header = header.expect("loop ran at least once");
    state
        .store
        .create_or_update_organization(OrganizationPatch {
            organization_id: header.id.clone(),
            login: Some(header.login.clone()),
            title: Some(header.name.clone().unwrap_or_else(|| header.login.clone())),
            avatar_url: header.avatar_url.clone(),
            members: Some(members),
            installation_id: Some(installation_id),
            ..Default::default()
        })
        .await?;

    Ok(header)
}

async fn fetch_repositories(
    state: &Arc<AppState>,
    installation_id: u64,
    login: &str,
) -> Result<Vec<CrawlRepository>> {
    let mut repositories = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let data = state
            .github
            .graphql(
                installation_id,
                REPOSITORIES_QUERY,
                json!({ "login": login, "cursor": cursor }),
            )
            .await?;
        let page: Paged<CrawlRepository> = serde_json::from_value(
            data.pointer("/organization/repositories")
                .cloned()
                .ok_or_else(|| anyhow!("missing repositories connection for {login}"))?,
        )
        .context("failed to parse repositories page")?;

        repositories.extend(page.nodes);
        if !page.page_info.has_next_page {
            break;
        }
        cursor = page.page_info.end_cursor;
    }

    Ok(repositories)
}

async fn sync_repository(
    state: &Arc<AppState>,
    installation_id: u64,
    owner: &UserRef,
    repository: &CrawlRepository,
) -> Result<()> {
    let collaborators = repository
        .collaborators
        .as_ref()
        .map(|c| c.nodes.iter().map(|a| a.login.clone()).collect())
        .unwrap_or_default();

    state
        .store
        .create_or_update_repository(RepositoryPatch {
            repository_id: repository.id.clone(),
            name: Some(repository.name.clone()),
            full_name: Some(repository.name_with_owner.clone()),
            url: Some(repository.url.clone()),
            owner: Some(owner.clone()),
            owner_type: Some(OwnerType::Organization),
            private: Some(repository.is_private),
            stars: Some(repository.stargazer_count),
            forks: Some(repository.fork_count),
            collaborators: Some(collaborators),
            installation_id: Some(installation_id),
            ..Default::default()
        })
        .await?;
    Ok(())
}

async fn fetch_issues(
    state: &Arc<AppState>,
    installation_id: u64,
    owner: &str,
    name: &str,
) -> Result<Vec<CrawlIssue>> {
    let mut issues = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let data = state
            .github
            .graphql(
                installation_id,
                ISSUES_QUERY,
                json!({ "owner": owner, "name": name, "cursor": cursor }),
            )
            .await?;
        let page: Paged<CrawlIssue> = serde_json::from_value(
            data.pointer("/repository/issues")
                .cloned()
                .ok_or_else(|| anyhow!("missing issues connection for {owner}/{name}"))?,
        )
        .context("failed to parse issues page")?;

        issues.extend(page.nodes);
        if !page.page_info.has_next_page {
            break;
        }
        cursor = page.page_info.end_cursor;
    }

    Ok(issues)
}

async fn fetch_pull_requests(
    state: &Arc<AppState>,
    installation_id: u64,
    owner: &str,
    name: &str,
) -> Result<Vec<CrawlPullRequest>> {
    let mut pull_requests = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let data = state
            .github
            .graphql(
                installation_id,
                PULL_REQUESTS_QUERY,
                json!({ "owner": owner, "name": name, "cursor": cursor }),
            )
            .await?;
        let page: Paged<CrawlPullRequest> = serde_json::from_value(
            data.pointer("/repository/pullRequests")
                .cloned()
                .ok_or_else(|| anyhow!("missing pullRequests connection for {owner}/{name}"))?,
        )
        .context("failed to parse pull requests page")?;

        pull_requests.extend(page.nodes);
        if !page.page_info.has_next_page {
            break;
        }
        cursor = page.page_info.end_cursor;
    }

    Ok(pull_requests)
}

/// Replay one repository's crawled history through the live upsert path.
async fn project_repository(
    state: &Arc<AppState>,
    owner: &UserRef,
    repository: &CrawlRepository,
    issues: Vec<CrawlIssue>,
    pull_requests: Vec<CrawlPullRequest>,
) -> Result<()> {
    for issue in &issues {
        let saved = state
            .store
            .create_or_update_issue(issue_from_crawl(issue, repository, owner))
            .await?;

        // The /price webhook may never have been received; the most
        // recent valid command in the comment history wins.
        if let Some((price, manager)) = latest_price_command(issue) {
            state
                .store
                .update_issue(
                    &saved.issue_id,
                    IssuePatch {
                        issue_id: saved.issue_id.clone(),
                        price: Some(price),
                        managers: Some(vec![manager]),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let saved = state.store.issue(&saved.issue_id).await?.unwrap_or(saved);
        stats::spawn_issue_recompute(state.clone(), saved);
    }

    for pull_request in &pull_requests {
        let saved = state
            .store
            .create_or_update_pull_request(pull_request_from_crawl(pull_request, repository))
            .await?;

        if saved.merged {
            for number in &saved.linked_issues {
                match mark_issue_solved(state, &repository.id, *number).await {
                    Ok(outcome) => info!(
                        "recovered merge of {}#{}: {outcome:?}",
                        repository.name_with_owner, number
                    ),
                    Err(e) => warn!(
                        "failed to mark {}#{number} solved during recovery: {e:#}",
                        repository.name_with_owner
                    ),
                }
            }
        }
    }

    Ok(())
}

/// The most recent well-formed `/price` command in an issue's comments,
/// with its author as the manager it establishes.
fn latest_price_command(issue: &CrawlIssue) -> Option<(u64, UserRef)> {
    issue
        .comments
        .nodes
        .iter()
        .rev()
        .find_map(|comment| match parse_price_comment(&comment.body) {
            PriceParse::Price(amount) => Some((
                amount,
                comment
                    .author
                    .as_ref()
                    .map(|author| UserRef {
                        login: author.login.clone(),
                        avatar_url: author.avatar_url.clone(),
                    })
                    .unwrap_or_else(UserRef::ghost),
            )),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::records::{IssueState, OrgState};
    use crate::store::{BountyStore, MemoryStore};
    use crate::testing::{MockDiscord, MockGitHub};
    use serde_json::json;

    fn app_state(github: Arc<MockGitHub>) -> Arc<AppState> {
        Arc::new(AppState {
            store: Arc::new(MemoryStore::new()),
            github,
            discord: Arc::new(MockDiscord::new()),
            webhook_secret: "secret".into(),
            discord_public_key: String::new(),
            bounty_channel_id: "chan-1".into(),
        })
    }

    fn no_more_pages() -> serde_json::Value {
        json!({ "hasNextPage": false, "endCursor": null })
    }

    /// One organization, one repository, one priced issue, one merged PR.
    fn queue_crawl_pages(github: &MockGitHub) {
        github.push_graphql_page(json!({
            "organization": {
                "id": "O_acme",
                "login": "acme",
                "name": "Acme Corp",
                "avatarUrl": "https://a/acme",
                "membersWithRole": {
                    "edges": [
                        { "role": "ADMIN", "node": { "login": "octo", "avatarUrl": null } },
                        { "role": "MEMBER", "node": { "login": "alice", "avatarUrl": null } }
                    ],
                    "pageInfo": no_more_pages()
                }
            }
        }));
        github.push_graphql_page(json!({
            "organization": {
                "repositories": {
                    "nodes": [{
                        "id": "R_1",
                        "name": "widget",
                        "nameWithOwner": "acme/widget",
                        "url": "https://github.com/acme/widget",
                        "isPrivate": false,
                        "stargazerCount": 5,
                        "forkCount": 1,
                        "collaborators": { "nodes": [ { "login": "octo" } ] }
                    }],
                    "pageInfo": no_more_pages()
                }
            }
        }));
        github.push_graphql_page(json!({
            "repository": {
                "issues": {
                    "nodes": [{
                        "id": "I_42",
                        "number": 7,
                        "title": "Widget is broken",
                        "body": "crash on start",
                        "url": "https://github.com/acme/widget/issues/7",
                        "state": "CLOSED",
                        "createdAt": "2024-03-01T12:00:00Z",
                        "author": { "login": "reporter", "avatarUrl": null },
                        "assignees": { "nodes": [ { "login": "alice", "avatarUrl": null } ] },
                        "labels": { "nodes": [ { "name": "bug" } ] },
                        "comments": { "nodes": [
                            { "body": "/price 50", "createdAt": "2024-03-01T13:00:00Z",
                              "author": { "login": "octo", "avatarUrl": null } },
                            { "body": "bumping this", "createdAt": "2024-03-01T14:00:00Z",
                              "author": { "login": "alice", "avatarUrl": null } },
                            { "body": "/price 100", "createdAt": "2024-03-01T15:00:00Z",
                              "author": { "login": "octo", "avatarUrl": null } }
                        ] }
                    }],
                    "pageInfo": no_more_pages()
                }
            }
        }));
        github.push_graphql_page(json!({
            "repository": {
                "pullRequests": {
                    "nodes": [{
                        "id": "PR_1",
                        "number": 12,
                        "title": "Fix the widget",
                        "url": "https://github.com/acme/widget/pull/12",
                        "state": "MERGED",
                        "merged": true,
                        "mergedAt": "2024-03-02T08:00:00Z",
                        "author": { "login": "alice", "avatarUrl": null },
                        "assignees": { "nodes": [] },
                        "labels": { "nodes": [] },
                        "closingIssuesReferences": { "nodes": [ { "number": 7 } ] }
                    }],
                    "pageInfo": no_more_pages()
                }
            }
        }));
    }

    #[tokio::test]
    async fn crawl_mirrors_org_repos_issues_and_prs() {
        let github = Arc::new(MockGitHub::new());
        queue_crawl_pages(&github);
        let state = app_state(github);

        let summary = recover_organization(&state, 12345, "acme").await.unwrap();
        assert_eq!(summary.repositories, 1);
        assert_eq!(summary.issues, 1);
        assert_eq!(summary.pull_requests, 1);

        let organization = state.store.organization("O_acme").await.unwrap().unwrap();
        assert_eq!(organization.members.len(), 2);
        assert_eq!(organization.state, OrgState::Pending, "state untouched");

        let repository = state.store.repository("R_1").await.unwrap().unwrap();
        assert_eq!(repository.full_name, "acme/widget");
        assert_eq!(repository.collaborators, vec!["octo".to_string()]);

        let issue = state.store.issue("I_42").await.unwrap().unwrap();
        assert_eq!(issue.state, IssueState::Closed);
        assert_eq!(issue.price, 100, "most recent /price wins");
        assert!(issue.is_manager("octo"));
        assert!(issue.solved, "merged PR marks the linked issue solved");

        let pull_request = state.store.pull_request("PR_1").await.unwrap().unwrap();
        assert!(pull_request.merged);
        assert_eq!(pull_request.linked_issues, vec![7]);
    }

    #[tokio::test]
    async fn second_crawl_is_a_no_op() {
        let github = Arc::new(MockGitHub::new());
        queue_crawl_pages(&github);
        let state = app_state(github.clone());
        recover_organization(&state, 12345, "acme").await.unwrap();
        // Let the detached stats recomputation settle before snapshotting.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let issue_before = state.store.issue("I_42").await.unwrap().unwrap();
        let repo_before = state.store.repository("R_1").await.unwrap().unwrap();

        queue_crawl_pages(&github);
        recover_organization(&state, 12345, "acme").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut issue_after = state.store.issue("I_42").await.unwrap().unwrap();
        let repo_after = state.store.repository("R_1").await.unwrap().unwrap();

        // Assignment timestamps default to "now" on first sight and are
        // preserved on re-crawl, so the records must be identical.
        assert_eq!(issue_before, issue_after);
        assert_eq!(repo_before, repo_after);

        // Solved stays marked exactly once.
        issue_after.solved = false;
        assert_ne!(issue_before, issue_after);
    }

    #[tokio::test]
    async fn price_scan_ignores_issues_without_commands() {
        let github = Arc::new(MockGitHub::new());
        github.push_graphql_page(json!({
            "organization": {
                "id": "O_acme", "login": "acme", "name": null, "avatarUrl": null,
                "membersWithRole": { "edges": [], "pageInfo": no_more_pages() }
            }
        }));
        github.push_graphql_page(json!({
            "organization": {
                "repositories": {
                    "nodes": [{
                        "id": "R_1", "name": "widget", "nameWithOwner": "acme/widget",
                        "url": "https://github.com/acme/widget"
                    }],
                    "pageInfo": no_more_pages()
                }
            }
        }));
        github.push_graphql_page(json!({
            "repository": {
                "issues": {
                    "nodes": [{
                        "id": "I_1", "number": 1, "title": "no bounty here",
                        "body": null,
                        "url": "https://github.com/acme/widget/issues/1",
                        "state": "OPEN", "createdAt": null, "author": null,
                        "comments": { "nodes": [
                            { "body": "/price abc", "createdAt": null,
                              "author": { "login": "octo", "avatarUrl": null } }
                        ] }
                    }],
                    "pageInfo": no_more_pages()
                }
            }
        }));
        github.push_graphql_page(json!({
            "repository": {
                "pullRequests": { "nodes": [], "pageInfo": no_more_pages() }
            }
        }));

        let state = app_state(github);
        recover_organization(&state, 12345, "acme").await.unwrap();

        let issue = state.store.issue("I_1").await.unwrap().unwrap();
        assert_eq!(issue.price, 0);
        assert_eq!(issue.managers.len(), 1, "only the ghost author");
        assert_eq!(issue.managers[0].login, "ghost");
    }
}
