//! Canonical entity records and their partial-update patches.
//!
//! Every entity is keyed by a stable external id (the GraphQL node id when
//! the source provides one, otherwise the numeric id rendered as a string).
//! Patches carry `Option` fields; an absent field leaves the stored value
//! untouched, so replaying the same patch is a no-op and out-of-order
//! deliveries converge to the same record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Login substituted when the source reports a deleted author.
pub const GHOST_LOGIN: &str = "ghost";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub login: String,
    pub avatar_url: Option<String>,
}

impl UserRef {
    pub fn ghost() -> Self {
        Self {
            login: GHOST_LOGIN.to_string(),
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub login: String,
    pub avatar_url: Option<String>,
    pub rewarded: bool,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Owning repository, denormalized onto each issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoState {
    Pending,
    Accepted,
    Rejected,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgState {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    Organization,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub issue_id: String,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub state: IssueState,
    pub solved: bool,
    pub rewarded: bool,
    pub price: u64,
    pub labels: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub solved_at: Option<DateTime<Utc>>,
    pub repository: RepoRef,
    pub owner: UserRef,
    pub assignees: Vec<Assignee>,
    pub managers: Vec<UserRef>,
    pub thread: Option<ThreadRef>,
    /// Denormalized from the owning repository for access control.
    pub collaborators: Vec<String>,
    pub private: bool,
}

/// Partial update for an [`Issue`], keyed by `issue_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssuePatch {
    pub issue_id: String,
    pub number: Option<u64>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub state: Option<IssueState>,
    pub solved: Option<bool>,
    pub rewarded: Option<bool>,
    pub price: Option<u64>,
    pub labels: Option<Vec<String>>,
    pub created_at: Option<DateTime<Utc>>,
    pub solved_at: Option<DateTime<Utc>>,
    pub repository: Option<RepoRef>,
    pub owner: Option<UserRef>,
    pub assignees: Option<Vec<Assignee>>,
    pub managers: Option<Vec<UserRef>>,
    pub thread: Option<ThreadRef>,
    pub collaborators: Option<Vec<String>>,
    pub private: Option<bool>,
}

impl Issue {
    /// Build a fresh record from a patch, defaulting every absent field.
    ///
    /// Creation from a partial patch is deliberate: an `assigned` event may
    /// arrive before the `opened` event that normally creates the record,
    /// and the later event fills the gaps.
    pub fn from_patch(patch: IssuePatch) -> Self {
        let mut issue = Issue {
            issue_id: patch.issue_id.clone(),
            number: 0,
            title: String::new(),
            url: String::new(),
            description: None,
            state: IssueState::Open,
            solved: false,
            rewarded: false,
            price: 0,
            labels: Vec::new(),
            created_at: None,
            solved_at: None,
            repository: RepoRef {
                id: String::new(),
                name: String::new(),
            },
            owner: UserRef::ghost(),
            assignees: Vec::new(),
            managers: Vec::new(),
            thread: None,
            collaborators: Vec::new(),
            private: false,
        };
        issue.apply(patch);
        issue
    }

    /// Merge a patch into this record. Fields absent from the patch are
    /// left untouched.
    ///
    /// Two collections merge rather than replace:
    /// - `assignees` is replaced as a set, but `rewarded` and the original
    ///   `assigned_at` are preserved for logins already present, so a
    ///   re-delivered event cannot reset a paid assignee.
    /// - `managers` is unioned by login, so re-projecting an issue cannot
    ///   drop a manager appended by a `/price` command.
    pub fn apply(&mut self, patch: IssuePatch) {
        if let Some(number) = patch.number {
            self.number = number;
        }
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(url) = patch.url {
            self.url = url;
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(solved) = patch.solved {
            self.solved = solved;
        }
        if let Some(rewarded) = patch.rewarded {
            self.rewarded = rewarded;
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(labels) = patch.labels {
            self.labels = labels;
        }
        if let Some(created_at) = patch.created_at {
            self.created_at = Some(created_at);
        }
        if let Some(solved_at) = patch.solved_at {
            self.solved_at = Some(solved_at);
        }
        if let Some(repository) = patch.repository {
            self.repository = repository;
        }
        if let Some(owner) = patch.owner {
            self.owner = owner;
        }
        if let Some(incoming) = patch.assignees {
            self.assignees = merge_assignees(&self.assignees, incoming);
        }
        if let Some(incoming) = patch.managers {
            for manager in incoming {
                if !self.managers.iter().any(|m| m.login == manager.login) {
                    self.managers.push(manager);
                }
            }
        }
        if let Some(thread) = patch.thread {
            self.thread = Some(thread);
        }
        if let Some(collaborators) = patch.collaborators {
            self.collaborators = collaborators;
        }
        if let Some(private) = patch.private {
            self.private = private;
        }
    }

    pub fn assignee(&self, login: &str) -> Option<&Assignee> {
        self.assignees.iter().find(|a| a.login == login)
    }

    pub fn is_manager(&self, login: &str) -> bool {
        self.managers.iter().any(|m| m.login == login)
    }
}

/// Replace the assignee list with `incoming`, keeping `rewarded` and the
/// original `assigned_at` for assignees that were already present.
fn merge_assignees(existing: &[Assignee], incoming: Vec<Assignee>) -> Vec<Assignee> {
    let mut merged: Vec<Assignee> = Vec::with_capacity(incoming.len());
    for assignee in incoming {
        if merged.iter().any(|a: &Assignee| a.login == assignee.login) {
            continue;
        }
        match existing.iter().find(|a| a.login == assignee.login) {
            // `rewarded` is monotonic: once an assignee has confirmed, a
            // re-delivered event cannot unset it.
            Some(prior) => merged.push(Assignee {
                login: assignee.login,
                avatar_url: assignee.avatar_url.or_else(|| prior.avatar_url.clone()),
                rewarded: prior.rewarded || assignee.rewarded,
                assigned_at: prior.assigned_at,
            }),
            None => merged.push(assignee),
        }
    }
    merged
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub repository_id: String,
    pub name: String,
    pub full_name: String,
    pub url: String,
    pub owner: UserRef,
    pub owner_type: OwnerType,
    pub collaborators: Vec<String>,
    pub private: bool,
    pub state: RepoState,
    pub stars: u64,
    pub forks: u64,
    pub installation_id: Option<u64>,
    pub issue_count: u64,
    /// Sum of price over solved issues with price > 0.
    pub rewarded_bounty_total: u64,
    /// Sum of price over open, unassigned issues with price > 0.
    pub available_bounty_total: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepositoryPatch {
    pub repository_id: String,
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub url: Option<String>,
    pub owner: Option<UserRef>,
    pub owner_type: Option<OwnerType>,
    pub collaborators: Option<Vec<String>>,
    pub private: Option<bool>,
    pub state: Option<RepoState>,
    pub stars: Option<u64>,
    pub forks: Option<u64>,
    pub installation_id: Option<u64>,
    pub issue_count: Option<u64>,
    pub rewarded_bounty_total: Option<u64>,
    pub available_bounty_total: Option<u64>,
}

impl Repository {
    pub fn from_patch(patch: RepositoryPatch) -> Self {
        let mut repository = Repository {
            repository_id: patch.repository_id.clone(),
            name: String::new(),
            full_name: String::new(),
            url: String::new(),
            owner: UserRef::ghost(),
            owner_type: OwnerType::User,
            collaborators: Vec::new(),
            private: false,
            state: RepoState::Pending,
            stars: 0,
            forks: 0,
            installation_id: None,
            issue_count: 0,
            rewarded_bounty_total: 0,
            available_bounty_total: 0,
        };
        repository.apply(patch);
        repository
    }

    pub fn apply(&mut self, patch: RepositoryPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(full_name) = patch.full_name {
            self.full_name = full_name;
        }
        if let Some(url) = patch.url {
            self.url = url;
        }
        if let Some(owner) = patch.owner {
            self.owner = owner;
        }
        if let Some(owner_type) = patch.owner_type {
            self.owner_type = owner_type;
        }
        if let Some(collaborators) = patch.collaborators {
            self.collaborators = collaborators;
        }
        if let Some(private) = patch.private {
            self.private = private;
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(stars) = patch.stars {
            self.stars = stars;
        }
        if let Some(forks) = patch.forks {
            self.forks = forks;
        }
        if let Some(installation_id) = patch.installation_id {
            self.installation_id = Some(installation_id);
        }
        if let Some(issue_count) = patch.issue_count {
            self.issue_count = issue_count;
        }
        if let Some(total) = patch.rewarded_bounty_total {
            self.rewarded_bounty_total = total;
        }
        if let Some(total) = patch.available_bounty_total {
            self.available_bounty_total = total;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMember {
    pub login: String,
    pub avatar_url: Option<String>,
    pub role: Option<String>,
    /// Set locally through the admin surface; a roster refresh must not
    /// clobber it.
    #[serde(default)]
    pub can_edit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub organization_id: String,
    pub login: String,
    pub title: String,
    pub avatar_url: Option<String>,
    pub members: Vec<OrgMember>,
    pub state: OrgState,
    pub installation_id: Option<u64>,
    pub issue_count: u64,
    pub rewarded_bounty_total: u64,
    pub available_bounty_total: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrganizationPatch {
    pub organization_id: String,
    pub login: Option<String>,
    pub title: Option<String>,
    pub avatar_url: Option<String>,
    pub members: Option<Vec<OrgMember>>,
    pub state: Option<OrgState>,
    pub installation_id: Option<u64>,
    pub issue_count: Option<u64>,
    pub rewarded_bounty_total: Option<u64>,
    pub available_bounty_total: Option<u64>,
}

impl Organization {
    pub fn from_patch(patch: OrganizationPatch) -> Self {
        let mut organization = Organization {
            organization_id: patch.organization_id.clone(),
            login: String::new(),
            title: String::new(),
            avatar_url: None,
            members: Vec::new(),
            state: OrgState::Pending,
            installation_id: None,
            issue_count: 0,
            rewarded_bounty_total: 0,
            available_bounty_total: 0,
        };
        organization.apply(patch);
        organization
    }

    /// Merge a patch. A member-roster refresh is a full replace that
    /// preserves the locally-set `can_edit` flag per login.
    pub fn apply(&mut self, patch: OrganizationPatch) {
        if let Some(login) = patch.login {
            self.login = login;
        }
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(avatar_url) = patch.avatar_url {
            self.avatar_url = Some(avatar_url);
        }
        if let Some(incoming) = patch.members {
            self.members = incoming
                .into_iter()
                .map(|mut member| {
                    if let Some(prior) = self.members.iter().find(|m| m.login == member.login) {
                        member.can_edit = prior.can_edit;
                    }
                    member
                })
                .collect();
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(installation_id) = patch.installation_id {
            self.installation_id = Some(installation_id);
        }
        if let Some(issue_count) = patch.issue_count {
            self.issue_count = issue_count;
        }
        if let Some(total) = patch.rewarded_bounty_total {
            self.rewarded_bounty_total = total;
        }
        if let Some(total) = patch.available_bounty_total {
            self.available_bounty_total = total;
        }
    }

    pub fn is_member(&self, login: &str) -> bool {
        self.members.iter().any(|m| m.login == login)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub pull_request_id: String,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub state: IssueState,
    pub merged: bool,
    pub merged_at: Option<DateTime<Utc>>,
    pub linked_issues: Vec<u64>,
    pub assignees: Vec<String>,
    pub requested_reviewers: Vec<String>,
    pub managers: Vec<UserRef>,
    pub labels: Vec<String>,
    pub repository_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullRequestPatch {
    pub pull_request_id: String,
    pub number: Option<u64>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub state: Option<IssueState>,
    pub merged: Option<bool>,
    pub merged_at: Option<DateTime<Utc>>,
    pub linked_issues: Option<Vec<u64>>,
    pub assignees: Option<Vec<String>>,
    pub requested_reviewers: Option<Vec<String>>,
    pub managers: Option<Vec<UserRef>>,
    pub labels: Option<Vec<String>>,
    pub repository_id: Option<String>,
}

impl PullRequest {
    pub fn from_patch(patch: PullRequestPatch) -> Self {
        let mut pull_request = PullRequest {
            pull_request_id: patch.pull_request_id.clone(),
            number: 0,
            title: String::new(),
            url: String::new(),
            state: IssueState::Open,
            merged: false,
            merged_at: None,
            linked_issues: Vec::new(),
            assignees: Vec::new(),
            requested_reviewers: Vec::new(),
            managers: Vec::new(),
            labels: Vec::new(),
            repository_id: String::new(),
        };
        pull_request.apply(patch);
        pull_request
    }

    pub fn apply(&mut self, patch: PullRequestPatch) {
        if let Some(number) = patch.number {
            self.number = number;
        }
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(url) = patch.url {
            self.url = url;
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(merged) = patch.merged {
            self.merged = merged;
        }
        if let Some(merged_at) = patch.merged_at {
            self.merged_at = Some(merged_at);
        }
        if let Some(linked_issues) = patch.linked_issues {
            self.linked_issues = linked_issues;
        }
        if let Some(assignees) = patch.assignees {
            self.assignees = assignees;
        }
        if let Some(requested_reviewers) = patch.requested_reviewers {
            self.requested_reviewers = requested_reviewers;
        }
        if let Some(managers) = patch.managers {
            self.managers = managers;
        }
        if let Some(labels) = patch.labels {
            self.labels = labels;
        }
        if let Some(repository_id) = patch.repository_id {
            self.repository_id = repository_id;
        }
    }
}

/// A platform user. The OAuth layer (out of scope here) writes the Discord
/// link; this engine reads it to resolve thread members and maintains the
/// reward total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedUser {
    pub login: String,
    pub github_id: Option<u64>,
    pub discord_id: Option<String>,
    #[serde(default)]
    pub reward_total: u64,
}
