//! Handlers for `pull_request.*` events.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::events::payload::{external_id, WebhookPayload};
use crate::events::{Outcome, Skip};
use crate::projection::pull_request_from_webhook;
use crate::stats;
use crate::store::records::{IssuePatch, IssueState};
use crate::store::BountyStore;
use crate::threads;
use crate::AppState;

/// `pull_request.{opened,reopened,edited}`: resolve the issues the PR
/// closes and upsert the mirror record.
pub async fn handle_change(state: &Arc<AppState>, payload: &WebhookPayload) -> Result<Outcome> {
    let Some(pull_request) = payload.pull_request.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("pull_request")));
    };
    let Some(repository) = payload.repository.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("repository")));
    };

    let linked_issues = resolve_linked_issues(state, payload).await?;
    state
        .store
        .create_or_update_pull_request(pull_request_from_webhook(
            pull_request,
            repository,
            linked_issues,
        ))
        .await?;
    Ok(Outcome::Completed)
}

/// `pull_request.closed`: upsert the record; when the PR merged, mark
/// every linked issue solved exactly once and notify its bounty thread.
pub async fn handle_closed(state: &Arc<AppState>, payload: &WebhookPayload) -> Result<Outcome> {
    let Some(pull_request) = payload.pull_request.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("pull_request")));
    };
    let Some(repository) = payload.repository.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("repository")));
    };

    let linked_issues = resolve_linked_issues(state, payload).await?;
    let saved = state
        .store
        .create_or_update_pull_request(pull_request_from_webhook(
            pull_request,
            repository,
            linked_issues.clone(),
        ))
        .await?;

    if !saved.merged {
        return Ok(Outcome::Completed);
    }

    let repository_id = external_id(&repository.node_id, repository.id);
    for number in linked_issues {
        let outcome = mark_issue_solved(state, &repository_id, number).await?;
        info!(
            "merge of PR #{} against issue #{number}: {outcome:?}",
            saved.number
        );
    }

    Ok(Outcome::Completed)
}

/// Mark one issue solved, idempotently. Already-solved issues are a
/// typed skip so a duplicate `closed` delivery or a recovery re-run never
/// double-announces.
pub(crate) async fn mark_issue_solved(
    state: &Arc<AppState>,
    repository_id: &str,
    number: u64,
) -> Result<Outcome> {
    let Some(issue) = state
        .store
        .issue_by_repo_and_number(repository_id, number)
        .await?
    else {
        return Ok(Outcome::skipped(Skip::NotFound("issue")));
    };

    if issue.solved {
        return Ok(Outcome::skipped(Skip::AlreadySolved));
    }

    let updated = state
        .store
        .update_issue(
            &issue.issue_id,
            IssuePatch {
                issue_id: issue.issue_id.clone(),
                solved: Some(true),
                solved_at: Some(Utc::now()),
                state: Some(IssueState::Closed),
                ..Default::default()
            },
        )
        .await?;

    threads::announce_solved(state.store.as_ref(), state.discord.as_ref(), &updated).await?;
    stats::spawn_issue_recompute(state.clone(), updated);
    Ok(Outcome::Completed)
}

async fn resolve_linked_issues(
    state: &Arc<AppState>,
    payload: &WebhookPayload,
) -> Result<Vec<u64>> {
    let (Some(pull_request), Some(repository)) =
        (payload.pull_request.as_ref(), payload.repository.as_ref())
    else {
        return Ok(Vec::new());
    };
    let Some(installation) = payload.installation.as_ref() else {
        warn!(
            "no installation in pull_request payload for {}, skipping linked-issue lookup",
            repository.full_name
        );
        return Ok(Vec::new());
    };
    let Some((owner, repo)) = repository.full_name.split_once('/') else {
        return Ok(Vec::new());
    };

    state
        .github
        .linked_issue_numbers(installation.id, owner, repo, pull_request.number)
        .await
}
