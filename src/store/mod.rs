//! Storage abstraction for the synchronized bounty data.
//!
//! The `BountyStore` trait is the only owner of entity state: no component
//! keeps a long-lived in-memory copy, every operation re-fetches, so
//! handlers stay re-entrant under duplicate or out-of-order webhook
//! delivery. Implementations: [`MemoryStore`] for tests and [`SqliteStore`]
//! for the real process.

pub mod memory;
pub mod records;
pub mod sqlite;

pub use memory::MemoryStore;
pub use records::{
    Assignee, Issue, IssuePatch, IssueState, LinkedUser, OrgMember, OrgState, Organization,
    OrganizationPatch, OwnerType, PullRequest, PullRequestPatch, RepoRef, RepoState, Repository,
    RepositoryPatch, ThreadRef, UserRef,
};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("storage error during {op}: {message}")]
    Storage { op: &'static str, message: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn storage(op: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            op,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Persistence operations for the four mirrored collections plus linked
/// users.
///
/// `create_or_update_*` looks up by external id, merges the patch into the
/// existing record or creates a new one from it, and is safe to call
/// repeatedly with the same body. `update_*` requires the record to exist
/// and surfaces a typed [`StoreError::NotFound`] otherwise.
#[async_trait]
pub trait BountyStore: Send + Sync {
    // Issues
    async fn create_or_update_issue(&self, patch: IssuePatch) -> Result<Issue, StoreError>;
    async fn update_issue(&self, issue_id: &str, patch: IssuePatch) -> Result<Issue, StoreError>;
    async fn issue(&self, issue_id: &str) -> Result<Option<Issue>, StoreError>;
    async fn issue_by_repo_and_number(
        &self,
        repository_id: &str,
        number: u64,
    ) -> Result<Option<Issue>, StoreError>;
    async fn delete_issue(&self, issue_id: &str) -> Result<Issue, StoreError>;
    async fn issues_for_repository(&self, repository_id: &str) -> Result<Vec<Issue>, StoreError>;
    async fn issues_assigned_to(&self, login: &str) -> Result<Vec<Issue>, StoreError>;

    // Repositories
    async fn create_or_update_repository(
        &self,
        patch: RepositoryPatch,
    ) -> Result<Repository, StoreError>;
    async fn update_repository(
        &self,
        repository_id: &str,
        patch: RepositoryPatch,
    ) -> Result<Repository, StoreError>;
    async fn repository(&self, repository_id: &str) -> Result<Option<Repository>, StoreError>;
    async fn repositories_for_owner(&self, login: &str) -> Result<Vec<Repository>, StoreError>;

    // Organizations
    async fn create_or_update_organization(
        &self,
        patch: OrganizationPatch,
    ) -> Result<Organization, StoreError>;
    async fn update_organization(
        &self,
        organization_id: &str,
        patch: OrganizationPatch,
    ) -> Result<Organization, StoreError>;
    async fn organization(
        &self,
        organization_id: &str,
    ) -> Result<Option<Organization>, StoreError>;
    async fn organization_by_login(&self, login: &str) -> Result<Option<Organization>, StoreError>;

    // Pull requests
    async fn create_or_update_pull_request(
        &self,
        patch: PullRequestPatch,
    ) -> Result<PullRequest, StoreError>;
    async fn pull_request(
        &self,
        pull_request_id: &str,
    ) -> Result<Option<PullRequest>, StoreError>;

    // Linked users
    async fn user_by_login(&self, login: &str) -> Result<Option<LinkedUser>, StoreError>;
    async fn user_by_discord_id(
        &self,
        discord_id: &str,
    ) -> Result<Option<LinkedUser>, StoreError>;
    async fn upsert_user(&self, user: LinkedUser) -> Result<LinkedUser, StoreError>;
}
