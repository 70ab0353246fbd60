//! `/price` command processing for `issue_comment.created` events.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::command::{parse_price_comment, PriceParse};
use crate::events::payload::WebhookPayload;
use crate::events::{Outcome, Skip};
use crate::projection::issue_from_webhook;
use crate::stats;
use crate::store::records::{IssuePatch, UserRef};
use crate::store::BountyStore;
use crate::threads;
use crate::AppState;

/// Handle a new issue comment. Only `/price <amount>` comments from an
/// authorized sender change anything; everything else is a silent skip.
///
/// On success the price and thread are persisted first; the confirmation
/// comment back to GitHub is fired as a detached best-effort task whose
/// failure cannot roll them back.
pub async fn handle_comment_created(
    state: &Arc<AppState>,
    payload: &WebhookPayload,
) -> Result<Outcome> {
    let Some(comment) = payload.comment.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("comment")));
    };
    let Some(issue_payload) = payload.issue.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("issue")));
    };
    let Some(repository) = payload.repository.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("repository")));
    };

    // Bounties live on issues; comments on pull requests reuse the same
    // event but carry a pull_request link.
    if issue_payload.pull_request.is_some() {
        return Ok(Outcome::skipped(Skip::PullRequestComment));
    }

    let price = match parse_price_comment(&comment.body) {
        PriceParse::NotCommand => return Ok(Outcome::skipped(Skip::NotACommand)),
        PriceParse::Invalid { attempted } => {
            info!(
                "rejecting malformed price from {}: '{attempted}'",
                comment.user.login
            );
            return Ok(Outcome::skipped(Skip::InvalidPrice { attempted }));
        }
        PriceParse::Price(amount) => amount,
    };

    let sender = payload.sender.as_ref().unwrap_or(&comment.user);

    if !is_authorized_price_setter(state, payload, &sender.login).await? {
        info!(
            "rejecting price from {}: not authorized for {}",
            sender.login, repository.full_name
        );
        return Ok(Outcome::skipped(Skip::UnauthorizedSender {
            login: sender.login.clone(),
        }));
    }

    // Make sure the issue exists before updating it; the comment may be
    // the first event we ever see for this issue.
    let issue = state
        .store
        .create_or_update_issue(issue_from_webhook(issue_payload, repository))
        .await?;

    let issue = state
        .store
        .update_issue(
            &issue.issue_id,
            IssuePatch {
                issue_id: issue.issue_id.clone(),
                price: Some(price),
                managers: Some(vec![UserRef {
                    login: sender.login.clone(),
                    avatar_url: sender.avatar_url.clone(),
                }]),
                ..Default::default()
            },
        )
        .await?;

    info!(
        "price of issue {} set to {price} by {}",
        issue.issue_id, sender.login
    );

    // A zero price records the amount but opens no thread.
    let issue = if price > 0 {
        let member_ids = threads::resolve_member_ids(state.store.as_ref(), &issue).await?;
        let thread = threads::obtain_thread(
            state.discord.as_ref(),
            &state.bounty_channel_id,
            &issue,
            price,
            &member_ids,
        )
        .await?;
        state
            .store
            .update_issue(
                &issue.issue_id,
                IssuePatch {
                    issue_id: issue.issue_id.clone(),
                    thread: Some(thread),
                    ..Default::default()
                },
            )
            .await?
    } else {
        issue
    };

    stats::spawn_issue_recompute(state.clone(), issue.clone());

    // Best-effort notification back to GitHub; the price and thread above
    // are the source of truth.
    if let Some(installation) = payload.installation.as_ref() {
        if let Some((owner, repo)) = repository.full_name.split_once('/') {
            let state = state.clone();
            let installation_id = installation.id;
            let owner = owner.to_string();
            let repo = repo.to_string();
            let number = issue.number;
            let body = bounty_comment(price, issue.number);
            tokio::spawn(async move {
                if let Err(e) = state
                    .github
                    .create_issue_comment(installation_id, &owner, &repo, number, &body)
                    .await
                {
                    error!("failed to post bounty comment on {owner}/{repo}#{number}: {e:#}");
                }
            });
        }
    }

    Ok(Outcome::Completed)
}

fn bounty_comment(price: u64, number: u64) -> String {
    format!(
        "This issue now carries a **${price}** bounty. \
         Get assigned to issue #{number} and link your Discord account to \
         join the bounty thread; the reward is confirmed there once the \
         issue is solved."
    )
}

/// Who may set a price: members of the owning organization, or the owning
/// user for repositories outside any organization.
async fn is_authorized_price_setter(
    state: &Arc<AppState>,
    payload: &WebhookPayload,
    login: &str,
) -> Result<bool> {
    let Some(repository) = payload.repository.as_ref() else {
        return Ok(false);
    };

    if !repository.is_organization_owned() {
        return Ok(repository
            .owner
            .as_ref()
            .is_some_and(|owner| owner.login == login));
    }

    let organization = match payload.organization.as_ref() {
        Some(org) => {
            state
                .store
                .organization(&crate::events::payload::external_id(&org.node_id, org.id))
                .await?
        }
        None => match repository.owner.as_ref() {
            Some(owner) => state.store.organization_by_login(&owner.login).await?,
            None => None,
        },
    };

    Ok(organization.is_some_and(|org| org.is_member(login)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::dispatch;
    use crate::store::records::{LinkedUser, OrgMember, OrgState, OrganizationPatch};
    use crate::store::{BountyStore, MemoryStore};
    use crate::testing::{MockDiscord, MockGitHub};
    use serde_json::json;

    struct Harness {
        state: Arc<AppState>,
        discord: Arc<MockDiscord>,
        github: Arc<MockGitHub>,
    }

    async fn harness() -> Harness {
        let store = MemoryStore::new();
        store
            .create_or_update_organization(OrganizationPatch {
                organization_id: "O_acme".into(),
                login: Some("acme".into()),
                title: Some("Acme".into()),
                state: Some(OrgState::Accepted),
                members: Some(vec![OrgMember {
                    login: "octo".into(),
                    avatar_url: None,
                    role: Some("admin".into()),
                    can_edit: false,
                }]),
                ..Default::default()
            })
            .await
            .unwrap();

        let discord = Arc::new(MockDiscord::new());
        let github = Arc::new(MockGitHub::new());
        let state = Arc::new(AppState {
            store: Arc::new(store),
            github: github.clone(),
            discord: discord.clone(),
            webhook_secret: "secret".into(),
            discord_public_key: String::new(),
            bounty_channel_id: "chan-1".into(),
        });
        Harness {
            state,
            discord,
            github,
        }
    }

    fn price_payload(body: &str, sender: &str) -> WebhookPayload {
        serde_json::from_value(json!({
            "action": "created",
            "comment": {
                "id": 9001,
                "body": body,
                "user": { "login": sender, "id": 1 }
            },
            "issue": {
                "id": 42,
                "node_id": "I_42",
                "number": 7,
                "title": "Widget is broken",
                "state": "open",
                "user": { "login": "reporter", "id": 5 },
                "assignees": []
            },
            "repository": {
                "id": 500,
                "node_id": "R_1",
                "name": "widget",
                "full_name": "acme/widget",
                "owner": { "login": "acme", "id": 99, "type": "Organization" }
            },
            "organization": { "id": 77, "node_id": "O_acme", "login": "acme" },
            "sender": { "login": sender, "id": 1 },
            "installation": { "id": 12345 }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn member_price_sets_price_and_opens_thread() {
        let h = harness().await;
        let outcome = dispatch(&h.state, "issue_comment", &price_payload("/price 100", "octo"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);

        let issue = h.state.store.issue("I_42").await.unwrap().unwrap();
        assert_eq!(issue.price, 100);
        assert!(issue.is_manager("octo"));
        let thread = issue.thread.expect("thread created on first price");
        assert_eq!(thread.name, "Issue #7");
        assert_eq!(h.discord.created_threads().len(), 1);
    }

    #[tokio::test]
    async fn non_member_price_is_rejected_silently() {
        let h = harness().await;
        let outcome = dispatch(
            &h.state,
            "issue_comment",
            &price_payload("/price 50", "stranger"),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            Outcome::Skipped(Skip::UnauthorizedSender {
                login: "stranger".into()
            })
        );

        // No record mutation, no thread.
        let issue = h.state.store.issue("I_42").await.unwrap();
        assert!(issue.is_none() || issue.unwrap().price == 0);
        assert!(h.discord.created_threads().is_empty());
    }

    #[tokio::test]
    async fn malformed_price_is_rejected() {
        let h = harness().await;
        for body in ["/price abc", "/price -5"] {
            let outcome = dispatch(&h.state, "issue_comment", &price_payload(body, "octo"))
                .await
                .unwrap();
            assert!(
                matches!(outcome, Outcome::Skipped(Skip::InvalidPrice { .. })),
                "{body} must be rejected"
            );
        }
        assert!(h.state.store.issue("I_42").await.unwrap().is_none());
        assert!(h.discord.created_threads().is_empty());
    }

    #[tokio::test]
    async fn ordinary_comment_is_not_a_command() {
        let h = harness().await;
        let outcome = dispatch(
            &h.state,
            "issue_comment",
            &price_payload("nice work everyone", "octo"),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Skipped(Skip::NotACommand));
    }

    #[tokio::test]
    async fn second_price_reuses_thread_and_posts_update() {
        let h = harness().await;
        dispatch(&h.state, "issue_comment", &price_payload("/price 100", "octo"))
            .await
            .unwrap();
        dispatch(&h.state, "issue_comment", &price_payload("/price 250", "octo"))
            .await
            .unwrap();

        let issue = h.state.store.issue("I_42").await.unwrap().unwrap();
        assert_eq!(issue.price, 250);
        assert_eq!(h.discord.created_threads().len(), 1, "one thread per issue");
        assert!(h
            .discord
            .messages()
            .iter()
            .any(|(_, content)| content.contains("updated to $250")));
    }

    #[tokio::test]
    async fn linked_managers_are_added_to_the_new_thread() {
        let h = harness().await;
        h.state
            .store
            .upsert_user(LinkedUser {
                login: "octo".into(),
                github_id: Some(1),
                discord_id: Some("d-octo".into()),
                reward_total: 0,
            })
            .await
            .unwrap();

        dispatch(&h.state, "issue_comment", &price_payload("/price 100", "octo"))
            .await
            .unwrap();

        let issue = h.state.store.issue("I_42").await.unwrap().unwrap();
        let thread = issue.thread.unwrap();
        assert_eq!(thread.members, vec!["d-octo".to_string()]);
        assert_eq!(h.discord.thread_members(&thread.id), vec!["d-octo"]);
    }

    #[tokio::test]
    async fn best_effort_comment_is_posted_back() {
        let h = harness().await;
        dispatch(&h.state, "issue_comment", &price_payload("/price 100", "octo"))
            .await
            .unwrap();

        // The notification is a detached task; give it a beat.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let comments = h.github.comments();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].owner, "acme");
        assert_eq!(comments[0].repo, "widget");
        assert_eq!(comments[0].issue_number, 7);
        assert!(comments[0].body.contains("$100"));
    }

    #[tokio::test]
    async fn price_command_on_pull_request_is_skipped() {
        let h = harness().await;
        let mut payload = price_payload("/price 100", "octo");
        if let Some(issue) = payload.issue.as_mut() {
            issue.pull_request = Some(serde_json::json!({"url": "https://x"}));
        }
        let outcome = dispatch(&h.state, "issue_comment", &payload).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(Skip::PullRequestComment));
    }
}
