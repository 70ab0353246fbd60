//! Handlers for `issues.*` events.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::events::payload::{external_id, WebhookPayload};
use crate::events::{Outcome, Skip};
use crate::projection::issue_from_webhook;
use crate::stats;
use crate::store::BountyStore;
use crate::threads;
use crate::AppState;

/// Shared path for opened/edited/closed/reopened/labeled/unlabeled:
/// project the payload and upsert.
pub async fn handle_issue_change(
    state: &Arc<AppState>,
    payload: &WebhookPayload,
) -> Result<Outcome> {
    let Some(issue) = payload.issue.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("issue")));
    };
    let Some(repository) = payload.repository.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("repository")));
    };

    let saved = state
        .store
        .create_or_update_issue(issue_from_webhook(issue, repository))
        .await?;
    stats::spawn_issue_recompute(state.clone(), saved);
    Ok(Outcome::Completed)
}

/// `issues.assigned`: upsert the authoritative assignee list, then pull
/// the new assignee into the bounty thread when both the thread and the
/// user's Discord link exist.
pub async fn handle_assigned(state: &Arc<AppState>, payload: &WebhookPayload) -> Result<Outcome> {
    let Some(issue) = payload.issue.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("issue")));
    };
    let Some(repository) = payload.repository.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("repository")));
    };

    let saved = state
        .store
        .create_or_update_issue(issue_from_webhook(issue, repository))
        .await?;

    if let Some(assignee) = payload.assignee.as_ref() {
        let update = threads::add_assignee_to_thread(
            state.store.as_ref(),
            state.discord.as_ref(),
            &saved.issue_id,
            &assignee.login,
        )
        .await?;
        info!(
            "assignment of {} to issue {}: thread update {update:?}",
            assignee.login, saved.issue_id
        );
    }

    stats::spawn_issue_recompute(state.clone(), saved);
    Ok(Outcome::Completed)
}

/// `issues.unassigned`: drop the user from the thread, then upsert the
/// remaining assignee list.
pub async fn handle_unassigned(state: &Arc<AppState>, payload: &WebhookPayload) -> Result<Outcome> {
    let Some(issue) = payload.issue.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("issue")));
    };
    let Some(repository) = payload.repository.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("repository")));
    };

    let issue_id = external_id(&issue.node_id, issue.id);
    if let Some(assignee) = payload.assignee.as_ref() {
        let update = threads::remove_assignee_from_thread(
            state.store.as_ref(),
            state.discord.as_ref(),
            &issue_id,
            &assignee.login,
        )
        .await?;
        info!(
            "unassignment of {} from issue {issue_id}: thread update {update:?}",
            assignee.login
        );
    }

    let saved = state
        .store
        .create_or_update_issue(issue_from_webhook(issue, repository))
        .await?;
    stats::spawn_issue_recompute(state.clone(), saved);
    Ok(Outcome::Completed)
}

/// `issues.transferred` / `issues.deleted`: the record leaves this
/// repository's scope.
pub async fn handle_issue_removed(
    state: &Arc<AppState>,
    payload: &WebhookPayload,
) -> Result<Outcome> {
    let Some(issue) = payload.issue.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("issue")));
    };

    let issue_id = external_id(&issue.node_id, issue.id);
    match state.store.delete_issue(&issue_id).await {
        Ok(removed) => {
            info!("removed issue {issue_id} from the mirror");
            stats::spawn_issue_recompute(state.clone(), removed);
            Ok(Outcome::Completed)
        }
        Err(e) if e.is_not_found() => Ok(Outcome::skipped(Skip::NotFound("issue"))),
        Err(e) => Err(e.into()),
    }
}
