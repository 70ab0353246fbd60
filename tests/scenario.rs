//! End-to-end walk through a bounty's life: issue opened, priced,
//! assigned, solved by a merged PR, and the reward confirmed from
//! Discord.

use std::sync::Arc;

use axum::body::Body;
use ed25519_dalek::{Signer, SigningKey};
use serde_json::json;
use tower::ServiceExt;

use bountyhub::events::{dispatch, payload::WebhookPayload, Outcome};
use bountyhub::interactions::interactions_router;
use bountyhub::store::records::{LinkedUser, OrgMember, OrgState, OrganizationPatch};
use bountyhub::store::{BountyStore, MemoryStore};
use bountyhub::testing::{MockDiscord, MockGitHub};
use bountyhub::AppState;

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

struct Harness {
    state: Arc<AppState>,
    github: Arc<MockGitHub>,
    discord: Arc<MockDiscord>,
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
    store
        .upsert_user(LinkedUser {
            login: "alice".into(),
            github_id: Some(2),
            discord_id: Some("d-alice".into()),
            reward_total: 0,
        })
        .await
        .unwrap();

    let github = Arc::new(MockGitHub::new());
    let discord = Arc::new(MockDiscord::new());
    let state = Arc::new(AppState {
        store: Arc::new(store),
        github: github.clone(),
        discord: discord.clone(),
        webhook_secret: "secret".into(),
        discord_public_key: hex::encode(signing_key().verifying_key().to_bytes()),
        bounty_channel_id: "chan-bounties".into(),
    });
    Harness {
        state,
        github,
        discord,
    }
}

fn repository_json() -> serde_json::Value {
    json!({
        "id": 500,
        "node_id": "R_1",
        "name": "widget",
        "full_name": "acme/widget",
        "private": false,
        "owner": { "login": "acme", "id": 99, "type": "Organization" }
    })
}

fn issue_json(assignees: serde_json::Value) -> serde_json::Value {
    json!({
        "id": 4242,
        "node_id": "I_42",
        "number": 42,
        "title": "Widget falls over",
        "body": "It should stay up",
        "html_url": "https://github.com/acme/widget/issues/42",
        "state": "open",
        "user": { "login": "reporter", "id": 5 },
        "assignees": assignees,
        "labels": [ { "name": "bug" } ]
    })
}

fn payload(value: serde_json::Value) -> WebhookPayload {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn bounty_lifecycle() {
    let h = harness().await;

    // Issue #42 opened with no price.
    let outcome = dispatch(
        &h.state,
        "issues",
        &payload(json!({
            "action": "opened",
            "issue": issue_json(json!([])),
            "repository": repository_json(),
            "organization": { "id": 77, "node_id": "O_acme", "login": "acme" }
        })),
    )
    .await
    .unwrap();
    assert_eq!(outcome, Outcome::Completed);

    let issue = h.state.store.issue("I_42").await.unwrap().unwrap();
    assert_eq!(issue.price, 0);
    assert!(issue.thread.is_none());

    // A maintainer prices it at $100: thread appears.
    let outcome = dispatch(
        &h.state,
        "issue_comment",
        &payload(json!({
            "action": "created",
            "comment": {
                "id": 1,
                "body": "/price 100",
                "user": { "login": "octo", "id": 1 }
            },
            "issue": issue_json(json!([])),
            "repository": repository_json(),
            "organization": { "id": 77, "node_id": "O_acme", "login": "acme" },
            "sender": { "login": "octo", "id": 1 },
            "installation": { "id": 12345 }
        })),
    )
    .await
    .unwrap();
    assert_eq!(outcome, Outcome::Completed);

    let issue = h.state.store.issue("I_42").await.unwrap().unwrap();
    assert_eq!(issue.price, 100);
    let thread = issue.thread.clone().expect("thread created by /price");
    assert_eq!(thread.name, "Issue #42");
    assert_eq!(h.discord.created_threads().len(), 1);

    // Alice (Discord-linked) gets assigned and joins the thread.
    let outcome = dispatch(
        &h.state,
        "issues",
        &payload(json!({
            "action": "assigned",
            "issue": issue_json(json!([ { "login": "alice", "id": 2 } ])),
            "assignee": { "login": "alice", "id": 2 },
            "repository": repository_json(),
            "organization": { "id": 77, "node_id": "O_acme", "login": "acme" }
        })),
    )
    .await
    .unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(
        h.discord.thread_members(&thread.id),
        vec!["d-alice".to_string()]
    );

    // A PR closing #42 merges.
    h.github.set_linked_issues("acme", "widget", 12, &[42]);
    let outcome = dispatch(
        &h.state,
        "pull_request",
        &payload(json!({
            "action": "closed",
            "pull_request": {
                "id": 900,
                "node_id": "PR_1",
                "number": 12,
                "title": "Keep the widget upright",
                "state": "closed",
                "merged": true,
                "merged_at": "2024-03-02T08:00:00Z",
                "user": { "login": "alice", "id": 2 }
            },
            "repository": repository_json(),
            "organization": { "id": 77, "node_id": "O_acme", "login": "acme" },
            "installation": { "id": 12345 }
        })),
    )
    .await
    .unwrap();
    assert_eq!(outcome, Outcome::Completed);

    let issue = h.state.store.issue("I_42").await.unwrap().unwrap();
    assert!(issue.solved);
    assert!(!issue.rewarded, "not rewarded until alice confirms");

    // Thread got the congratulations and the tagged confirm control.
    assert!(h
        .discord
        .messages()
        .iter()
        .any(|(channel, content)| channel == &thread.id && content.contains("solved")));
    let buttons = h.discord.button_messages();
    assert_eq!(buttons.len(), 1);
    assert_eq!(buttons[0].custom_id, "received_reward_I_42");

    // Alice clicks the confirm button in Discord.
    let click_body = json!({
        "type": 3,
        "data": { "custom_id": "received_reward_I_42" },
        "member": { "user": { "id": "d-alice" } }
    })
    .to_string();
    let timestamp = "1700000000";
    let mut message = timestamp.as_bytes().to_vec();
    message.extend_from_slice(click_body.as_bytes());
    let signature = signing_key().sign(&message);

    let app = interactions_router().with_state(h.state.clone());
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/discord/interactions")
                .header("x-signature-ed25519", hex::encode(signature.to_bytes()))
                .header("x-signature-timestamp", timestamp)
                .body(Body::from(click_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    // Sole assignee confirmed: both flags flip.
    let issue = h.state.store.issue("I_42").await.unwrap().unwrap();
    assert!(issue.assignee("alice").unwrap().rewarded);
    assert!(issue.rewarded);

    // Stats settle eventually; force them for the assertion.
    bountyhub::stats::recompute_user(h.state.store.as_ref(), "alice")
        .await
        .unwrap();
    let alice = h
        .state
        .store
        .user_by_login("alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alice.reward_total, 100);
}
