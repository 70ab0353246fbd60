//! Aggregate bounty counters, recomputed after issue writes.
//!
//! Recomputation runs as a detached background task with no ordering
//! guarantee relative to the triggering upsert's return; the counters are
//! eventually consistent. The individual functions are awaitable so tests
//! can call them directly.

use std::sync::Arc;

use tracing::error;

use crate::store::records::{Issue, IssueState, OrganizationPatch, RepositoryPatch};
use crate::store::{BountyStore, StoreError};
use crate::AppState;

/// Recompute a repository's issue count and bounty totals. A repository
/// that was never onboarded is silently skipped.
pub async fn recompute_repository(
    store: &dyn BountyStore,
    repository_id: &str,
) -> Result<(), StoreError> {
    let issues = store.issues_for_repository(repository_id).await?;

    let patch = RepositoryPatch {
        repository_id: repository_id.to_string(),
        issue_count: Some(issues.len() as u64),
        rewarded_bounty_total: Some(
            issues
                .iter()
                .filter(|i| i.solved && i.price > 0)
                .map(|i| i.price)
                .sum(),
        ),
        available_bounty_total: Some(
            issues
                .iter()
                .filter(|i| i.state == IssueState::Open && i.assignees.is_empty() && i.price > 0)
                .map(|i| i.price)
                .sum(),
        ),
        ..Default::default()
    };

    match store.update_repository(repository_id, patch).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Roll repository counters up into the owning organization.
pub async fn recompute_organization(
    store: &dyn BountyStore,
    owner_login: &str,
) -> Result<(), StoreError> {
    let Some(organization) = store.organization_by_login(owner_login).await? else {
        return Ok(());
    };

    let repositories = store.repositories_for_owner(owner_login).await?;
    let patch = OrganizationPatch {
        organization_id: organization.organization_id.clone(),
        issue_count: Some(repositories.iter().map(|r| r.issue_count).sum()),
        rewarded_bounty_total: Some(repositories.iter().map(|r| r.rewarded_bounty_total).sum()),
        available_bounty_total: Some(
            repositories.iter().map(|r| r.available_bounty_total).sum(),
        ),
        ..Default::default()
    };

    store
        .update_organization(&organization.organization_id, patch)
        .await?;
    Ok(())
}

/// Recompute one user's personal reward total: the sum of prices of issues
/// on which that user's assignee entry is marked rewarded. Users that
/// never registered on the platform are skipped.
pub async fn recompute_user(store: &dyn BountyStore, login: &str) -> Result<(), StoreError> {
    let Some(mut user) = store.user_by_login(login).await? else {
        return Ok(());
    };

    let issues = store.issues_assigned_to(login).await?;
    user.reward_total = issues
        .iter()
        .filter(|issue| issue.assignee(login).is_some_and(|a| a.rewarded))
        .map(|issue| issue.price)
        .sum();

    store.upsert_user(user).await?;
    Ok(())
}

/// Detached recomputation of everything an issue write can affect.
pub fn spawn_issue_recompute(state: Arc<AppState>, issue: Issue) {
    tokio::spawn(async move {
        if let Err(e) = recompute_repository(state.store.as_ref(), &issue.repository.id).await {
            error!(
                "stats recompute failed for repository {}: {e}",
                issue.repository.id
            );
        }
        if let Err(e) = recompute_organization(state.store.as_ref(), &issue.owner.login).await {
            error!(
                "stats recompute failed for organization {}: {e}",
                issue.owner.login
            );
        }
        for assignee in &issue.assignees {
            if let Err(e) = recompute_user(state.store.as_ref(), &assignee.login).await {
                error!("stats recompute failed for user {}: {e}", assignee.login);
            }
        }
    });
}
