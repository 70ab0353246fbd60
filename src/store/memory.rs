//! In-memory implementation of [`BountyStore`].
//!
//! Entities live in `HashMap`s behind `RwLock`s; everything is lost on
//! restart. Used by the test suites and handy for local experiments.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::records::{
    Issue, IssuePatch, LinkedUser, Organization, OrganizationPatch, PullRequest, PullRequestPatch,
    Repository, RepositoryPatch,
};
use super::{BountyStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    issues: RwLock<HashMap<String, Issue>>,
    repositories: RwLock<HashMap<String, Repository>>,
    organizations: RwLock<HashMap<String, Organization>>,
    pull_requests: RwLock<HashMap<String, PullRequest>>,
    users: RwLock<HashMap<String, LinkedUser>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BountyStore for MemoryStore {
    async fn create_or_update_issue(&self, patch: IssuePatch) -> Result<Issue, StoreError> {
        let mut issues = self.issues.write().await;
        let issue = match issues.get_mut(&patch.issue_id) {
            Some(existing) => {
                existing.apply(patch);
                existing.clone()
            }
            None => {
                let issue = Issue::from_patch(patch);
                issues.insert(issue.issue_id.clone(), issue.clone());
                issue
            }
        };
        Ok(issue)
    }

    async fn update_issue(&self, issue_id: &str, patch: IssuePatch) -> Result<Issue, StoreError> {
        let mut issues = self.issues.write().await;
        let issue = issues
            .get_mut(issue_id)
            .ok_or_else(|| StoreError::not_found("issue", issue_id))?;
        issue.apply(patch);
        Ok(issue.clone())
    }

    async fn issue(&self, issue_id: &str) -> Result<Option<Issue>, StoreError> {
        Ok(self.issues.read().await.get(issue_id).cloned())
    }

    async fn issue_by_repo_and_number(
        &self,
        repository_id: &str,
        number: u64,
    ) -> Result<Option<Issue>, StoreError> {
        Ok(self
            .issues
            .read()
            .await
            .values()
            .find(|issue| issue.repository.id == repository_id && issue.number == number)
            .cloned())
    }

    async fn delete_issue(&self, issue_id: &str) -> Result<Issue, StoreError> {
        self.issues
            .write()
            .await
            .remove(issue_id)
            .ok_or_else(|| StoreError::not_found("issue", issue_id))
    }

    async fn issues_for_repository(&self, repository_id: &str) -> Result<Vec<Issue>, StoreError> {
        Ok(self
            .issues
            .read()
            .await
            .values()
            .filter(|issue| issue.repository.id == repository_id)
            .cloned()
            .collect())
    }

    async fn issues_assigned_to(&self, login: &str) -> Result<Vec<Issue>, StoreError> {
        Ok(self
            .issues
            .read()
            .await
            .values()
            .filter(|issue| issue.assignee(login).is_some())
            .cloned()
            .collect())
    }

    async fn create_or_update_repository(
        &self,
        patch: RepositoryPatch,
    ) -> Result<Repository, StoreError> {
        let mut repositories = self.repositories.write().await;
        let repository = match repositories.get_mut(&patch.repository_id) {
            Some(existing) => {
                existing.apply(patch);
                existing.clone()
            }
            None => {
                let repository = Repository::from_patch(patch);
                repositories.insert(repository.repository_id.clone(), repository.clone());
                repository
            }
        };
        Ok(repository)
    }

    async fn update_repository(
        &self,
        repository_id: &str,
        patch: RepositoryPatch,
    ) -> Result<Repository, StoreError> {
        let mut repositories = self.repositories.write().await;
        let repository = repositories
            .get_mut(repository_id)
            .ok_or_else(|| StoreError::not_found("repository", repository_id))?;
        repository.apply(patch);
        Ok(repository.clone())
    }

    async fn repository(&self, repository_id: &str) -> Result<Option<Repository>, StoreError> {
        Ok(self.repositories.read().await.get(repository_id).cloned())
    }

    async fn repositories_for_owner(&self, login: &str) -> Result<Vec<Repository>, StoreError> {
        Ok(self
            .repositories
            .read()
            .await
            .values()
            .filter(|repository| repository.owner.login == login)
            .cloned()
            .collect())
    }

    async fn create_or_update_organization(
        &self,
        patch: OrganizationPatch,
    ) -> Result<Organization, StoreError> {
        let mut organizations = self.organizations.write().await;
        let organization = match organizations.get_mut(&patch.organization_id) {
            Some(existing) => {
                existing.apply(patch);
                existing.clone()
            }
            None => {
                let organization = Organization::from_patch(patch);
                organizations.insert(organization.organization_id.clone(), organization.clone());
                organization
            }
        };
        Ok(organization)
    }

    async fn update_organization(
        &self,
        organization_id: &str,
        patch: OrganizationPatch,
    ) -> Result<Organization, StoreError> {
        let mut organizations = self.organizations.write().await;
        let organization = organizations
            .get_mut(organization_id)
            .ok_or_else(|| StoreError::not_found("organization", organization_id))?;
        organization.apply(patch);
        Ok(organization.clone())
    }

    async fn organization(
        &self,
        organization_id: &str,
    ) -> Result<Option<Organization>, StoreError> {
        Ok(self
            .organizations
            .read()
            .await
            .get(organization_id)
            .cloned())
    }

    async fn organization_by_login(&self, login: &str) -> Result<Option<Organization>, StoreError> {
        Ok(self
            .organizations
            .read()
            .await
            .values()
            .find(|organization| organization.login == login)
            .cloned())
    }

    async fn create_or_update_pull_request(
        &self,
        patch: PullRequestPatch,
    ) -> Result<PullRequest, StoreError> {
        let mut pull_requests = self.pull_requests.write().await;
        let pull_request = match pull_requests.get_mut(&patch.pull_request_id) {
            Some(existing) => {
                existing.apply(patch);
                existing.clone()
            }
            None => {
                let pull_request = PullRequest::from_patch(patch);
                pull_requests.insert(pull_request.pull_request_id.clone(), pull_request.clone());
                pull_request
            }
        };
        Ok(pull_request)
    }

    async fn pull_request(
        &self,
        pull_request_id: &str,
    ) -> Result<Option<PullRequest>, StoreError> {
        Ok(self
            .pull_requests
            .read()
            .await
            .get(pull_request_id)
            .cloned())
    }

    async fn user_by_login(&self, login: &str) -> Result<Option<LinkedUser>, StoreError> {
        Ok(self.users.read().await.get(login).cloned())
    }

    async fn user_by_discord_id(
        &self,
        discord_id: &str,
    ) -> Result<Option<LinkedUser>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.discord_id.as_deref() == Some(discord_id))
            .cloned())
    }

    async fn upsert_user(&self, user: LinkedUser) -> Result<LinkedUser, StoreError> {
        self.users
            .write()
            .await
            .insert(user.login.clone(), user.clone());
        Ok(user)
    }
}
