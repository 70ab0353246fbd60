//! Webhook event routing.
//!
//! `dispatch` maps `(event, action)` pairs onto handlers and applies the
//! eligibility gate for every event that mutates repository-scoped state.
//! Handlers report [`Outcome`] so a benign skip (not onboarded, bad user
//! input, missing linkage) is never confused with a real failure; real
//! failures propagate as errors and are absorbed and logged at the
//! spawn boundary in the webhook layer.

pub mod comments;
pub mod issues;
pub mod organizations;
pub mod payload;
pub mod pull_requests;
pub mod repositories;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::eligibility::is_event_eligible;
use crate::AppState;
use payload::WebhookPayload;

/// How a handler disposed of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Skipped(Skip),
}

/// Reasons an event was deliberately not processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// Owning organization/repository is not in the accepted state.
    NotEligible,
    /// Comment does not carry a `/price` command.
    NotACommand,
    /// `/price` argument was malformed.
    InvalidPrice { attempted: String },
    /// Comment author is not allowed to set the price.
    UnauthorizedSender { login: String },
    /// `/price` on a pull-request comment rather than an issue.
    PullRequestComment,
    /// Payload is missing a field this handler needs.
    MissingField(&'static str),
    /// The record an update targeted does not exist.
    NotFound(&'static str),
    /// A merged PR referenced an issue that is already marked solved.
    AlreadySolved,
    /// No handler registered for this event/action pair.
    UnhandledEvent,
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::NotEligible => write!(f, "owner not in accepted state"),
            Skip::NotACommand => write!(f, "not a price command"),
            Skip::InvalidPrice { attempted } => {
                write!(f, "invalid price argument '{attempted}'")
            }
            Skip::UnauthorizedSender { login } => {
                write!(f, "sender '{login}' not authorized to set price")
            }
            Skip::PullRequestComment => write!(f, "price command on a pull request"),
            Skip::MissingField(field) => write!(f, "payload missing '{field}'"),
            Skip::NotFound(entity) => write!(f, "{entity} not found"),
            Skip::AlreadySolved => write!(f, "issue already marked solved"),
            Skip::UnhandledEvent => write!(f, "no handler for this event"),
        }
    }
}

impl Outcome {
    pub fn skipped(skip: Skip) -> Self {
        Outcome::Skipped(skip)
    }
}

/// Events that mutate repository-scoped state and therefore require the
/// owning organization/repository to be accepted. Installation events are
/// exempt: they are how a repository enters the pending state in the
/// first place.
fn requires_eligibility(event: &str) -> bool {
    matches!(
        event,
        "issues" | "issue_comment" | "pull_request" | "star" | "member" | "repository"
    )
}

/// Route one webhook delivery to its handler.
pub async fn dispatch(
    state: &Arc<AppState>,
    event: &str,
    payload: &WebhookPayload,
) -> Result<Outcome> {
    let action = payload.action.as_deref().unwrap_or_default();

    if requires_eligibility(event) {
        let Some(repository) = payload.repository.as_ref() else {
            return Ok(Outcome::skipped(Skip::MissingField("repository")));
        };
        let eligible =
            is_event_eligible(state.store.as_ref(), repository, payload.organization.as_ref())
                .await?;
        if !eligible {
            return Ok(Outcome::skipped(Skip::NotEligible));
        }
    }

    match (event, action) {
        ("issues", "opened" | "edited" | "closed" | "reopened" | "labeled" | "unlabeled") => {
            issues::handle_issue_change(state, payload).await
        }
        ("issues", "assigned") => issues::handle_assigned(state, payload).await,
        ("issues", "unassigned") => issues::handle_unassigned(state, payload).await,
        ("issues", "transferred" | "deleted") => issues::handle_issue_removed(state, payload).await,
        ("issue_comment", "created") => comments::handle_comment_created(state, payload).await,
        ("organization", "member_added" | "member_removed") => {
            organizations::handle_member_change(state, payload).await
        }
        ("star", "created" | "deleted") => repositories::handle_star(state, payload).await,
        ("member", "added" | "removed") => {
            repositories::handle_collaborator_change(state, payload).await
        }
        ("repository", "privatized" | "publicized") => {
            repositories::handle_visibility_change(state, payload).await
        }
        ("installation", "created") => {
            repositories::handle_installation_created(state, payload).await
        }
        ("installation_repositories", "added") => {
            repositories::handle_installation_repositories_added(state, payload).await
        }
        ("installation_repositories", "removed") => {
            repositories::handle_installation_repositories_removed(state, payload).await
        }
        ("pull_request", "opened" | "reopened" | "edited") => {
            pull_requests::handle_change(state, payload).await
        }
        ("pull_request", "closed") => pull_requests::handle_closed(state, payload).await,
        _ => Ok(Outcome::skipped(Skip::UnhandledEvent)),
    }
}
