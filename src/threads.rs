//! Discord thread lifecycle for bounty-bearing issues.
//!
//! Each issue with a price gets one private thread under the configured
//! bounty channel, named from the issue number. Membership follows the
//! issue's assignees and managers, gated on each user having linked a
//! Discord account; unlinked users are skipped, never an error. Reward
//! confirmation is the one place where misuse is surfaced back to the
//! user as a typed error.

use anyhow::Result;
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info};

use crate::discord::DiscordApi;
use crate::store::records::{Issue, IssuePatch, ThreadRef};
use crate::store::{BountyStore, StoreError};

/// Prefix of the reward-confirmation button's custom id; the issue id is
/// appended so the interaction can be routed back to the right issue.
pub const REWARD_CUSTOM_ID_PREFIX: &str = "received_reward_";

pub fn thread_name(issue_number: u64) -> String {
    format!("Issue #{issue_number}")
}

pub fn reward_custom_id(issue_id: &str) -> String {
    format!("{REWARD_CUSTOM_ID_PREFIX}{issue_id}")
}

/// Outcome of a membership change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadUpdate {
    Applied,
    /// The user never linked a Discord account.
    NoLinkedAccount,
    /// The issue has no thread yet (no price has been set).
    NoThread,
}

/// Resolve the Discord ids of every assignee and manager that has linked
/// a Discord account. Unlinked users are silently dropped.
pub async fn resolve_member_ids(
    store: &dyn BountyStore,
    issue: &Issue,
) -> Result<Vec<String>, StoreError> {
    let mut ids = Vec::new();
    let logins = issue
        .assignees
        .iter()
        .map(|a| a.login.as_str())
        .chain(issue.managers.iter().map(|m| m.login.as_str()));
    for login in logins {
        if let Some(user) = store.user_by_login(login).await? {
            if let Some(discord_id) = user.discord_id {
                if !ids.contains(&discord_id) {
                    ids.push(discord_id);
                }
            }
        }
    }
    Ok(ids)
}

/// Get the issue's thread, creating it on the first price.
///
/// An existing thread gets a price-update message; a missing one is
/// created, seeded, and populated with `member_ids`. Member adds are
/// independent per user and a failing one does not roll back the others.
/// The returned thread identity still has to be persisted by the caller.
pub async fn obtain_thread(
    discord: &dyn DiscordApi,
    channel_id: &str,
    issue: &Issue,
    price: u64,
    member_ids: &[String],
) -> Result<ThreadRef> {
    if let Some(thread) = &issue.thread {
        discord
            .send_message(
                &thread.id,
                &format!("Price has been updated to ${price}"),
            )
            .await?;
        return Ok(thread.clone());
    }

    let name = thread_name(issue.number);
    let created = discord
        .create_private_thread(channel_id, &name, "Issue marked as bounty")
        .await?;

    let mut members = Vec::new();
    for member_id in member_ids {
        match discord.add_thread_member(&created.id, member_id).await {
            Ok(()) => members.push(member_id.clone()),
            Err(e) => error!("failed to add {member_id} to thread {}: {e:#}", created.id),
        }
    }

    discord
        .send_message(
            &created.id,
            &format!(
                "Issue #{} is now a bounty worth ${price}. Assignees will be \
                 added to this thread when they are assigned to the issue.",
                issue.number
            ),
        )
        .await?;

    Ok(ThreadRef {
        id: created.id,
        name: created.name,
        members,
    })
}

/// Add a newly-assigned user to the issue's thread, if both the thread
/// and the user's Discord link exist.
pub async fn add_assignee_to_thread(
    store: &dyn BountyStore,
    discord: &dyn DiscordApi,
    issue_id: &str,
    login: &str,
) -> Result<ThreadUpdate> {
    let Some(discord_id) = linked_discord_id(store, login).await? else {
        return Ok(ThreadUpdate::NoLinkedAccount);
    };
    let Some(issue) = store.issue(issue_id).await? else {
        return Ok(ThreadUpdate::NoThread);
    };
    let Some(thread) = issue.thread else {
        return Ok(ThreadUpdate::NoThread);
    };

    discord.add_thread_member(&thread.id, &discord_id).await?;
    remember_member(store, &issue.issue_id, &thread, &discord_id, true).await?;
    Ok(ThreadUpdate::Applied)
}

/// Remove an unassigned user from the issue's thread.
pub async fn remove_assignee_from_thread(
    store: &dyn BountyStore,
    discord: &dyn DiscordApi,
    issue_id: &str,
    login: &str,
) -> Result<ThreadUpdate> {
    let Some(discord_id) = linked_discord_id(store, login).await? else {
        return Ok(ThreadUpdate::NoLinkedAccount);
    };
    let Some(issue) = store.issue(issue_id).await? else {
        return Ok(ThreadUpdate::NoThread);
    };
    let Some(thread) = issue.thread else {
        return Ok(ThreadUpdate::NoThread);
    };

    discord.remove_thread_member(&thread.id, &discord_id).await?;
    remember_member(store, &issue.issue_id, &thread, &discord_id, false).await?;
    Ok(ThreadUpdate::Applied)
}

async fn linked_discord_id(
    store: &dyn BountyStore,
    login: &str,
) -> Result<Option<String>, StoreError> {
    Ok(store
        .user_by_login(login)
        .await?
        .and_then(|user| user.discord_id))
}

async fn remember_member(
    store: &dyn BountyStore,
    issue_id: &str,
    thread: &ThreadRef,
    discord_id: &str,
    present: bool,
) -> Result<(), StoreError> {
    let mut members = thread.members.clone();
    if present {
        if !members.iter().any(|m| m == discord_id) {
            members.push(discord_id.to_string());
        }
    } else {
        members.retain(|m| m != discord_id);
    }
    store
        .update_issue(
            issue_id,
            IssuePatch {
                issue_id: issue_id.to_string(),
                thread: Some(ThreadRef {
                    id: thread.id.clone(),
                    name: thread.name.clone(),
                    members,
                }),
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}

/// Post the solved announcement and a reward-confirmation control per
/// linked assignee. No-op when the issue never got a thread.
pub async fn announce_solved(
    store: &dyn BountyStore,
    discord: &dyn DiscordApi,
    issue: &Issue,
) -> Result<()> {
    let Some(thread) = &issue.thread else {
        info!(
            "issue {} solved without a thread, skipping announcement",
            issue.issue_id
        );
        return Ok(());
    };

    discord
        .send_message(
            &thread.id,
            &format!(
                "Issue #{} has been solved! The ${} bounty is on its way.",
                issue.number, issue.price
            ),
        )
        .await?;

    let custom_id = reward_custom_id(&issue.issue_id);
    for assignee in &issue.assignees {
        let Some(discord_id) = linked_discord_id(store, &assignee.login).await? else {
            continue;
        };
        discord
            .send_message_with_button(
                &thread.id,
                &format!(
                    "<@{discord_id}> please confirm you received the ${} reward.",
                    issue.price
                ),
                &custom_id,
                "Confirm receipt",
            )
            .await?;
    }

    Ok(())
}

/// Why a reward confirmation was refused. These are genuine misuse
/// attempts and are surfaced to the interacting user, unlike the silent
/// skips elsewhere.
#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("this Discord account is not linked to a platform user")]
    UnknownUser,
    #[error("issue not found")]
    IssueNotFound,
    #[error("only assignees of the issue can confirm the reward")]
    NotAnAssignee,
    #[error("the issue has not been solved yet")]
    NotSolved,
    #[error("this reward was already confirmed")]
    AlreadyRewarded,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Mark the clicking assignee's reward as received.
///
/// When the last assignee confirms, the issue's aggregate `rewarded` flag
/// flips as well. Each precondition violation maps to its own
/// [`ConfirmError`].
pub async fn confirm_reward(
    store: &dyn BountyStore,
    issue_id: &str,
    discord_user_id: &str,
) -> Result<Issue, ConfirmError> {
    let user = store
        .user_by_discord_id(discord_user_id)
        .await?
        .ok_or(ConfirmError::UnknownUser)?;

    let issue = store
        .issue(issue_id)
        .await?
        .ok_or(ConfirmError::IssueNotFound)?;

    let assignee = issue
        .assignee(&user.login)
        .ok_or(ConfirmError::NotAnAssignee)?;

    if !issue.solved {
        return Err(ConfirmError::NotSolved);
    }
    if assignee.rewarded {
        return Err(ConfirmError::AlreadyRewarded);
    }

    let assignees: Vec<_> = issue
        .assignees
        .iter()
        .cloned()
        .map(|mut a| {
            if a.login == user.login {
                a.rewarded = true;
            }
            a
        })
        .collect();
    let all_rewarded = assignees.iter().all(|a| a.rewarded);

    let updated = store
        .update_issue(
            issue_id,
            IssuePatch {
                issue_id: issue_id.to_string(),
                assignees: Some(assignees),
                rewarded: Some(all_rewarded),
                solved_at: issue.solved_at.or_else(|| Some(Utc::now())),
                ..Default::default()
            },
        )
        .await?;

    info!(
        "reward confirmed by {} for issue {} (all confirmed: {all_rewarded})",
        user.login, issue_id
    );

    Ok(updated)
}
