//! Inbound Discord interaction endpoint.
//!
//! Discord signs every interaction with the application's Ed25519 key
//! over `timestamp || body`; unverifiable requests must be rejected with
//! 401 or Discord disables the endpoint. PINGs are answered with PONG.
//! The only component handled here is the reward-confirmation button,
//! whose custom id carries the issue id. Invalid confirmations are the
//! one error category surfaced to the end user (as an ephemeral reply).

use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::stats;
use crate::threads::{self, REWARD_CUSTOM_ID_PREFIX};
use crate::AppState;

const INTERACTION_PING: u8 = 1;
const INTERACTION_MESSAGE_COMPONENT: u8 = 3;

const RESPONSE_PONG: u8 = 1;
const RESPONSE_CHANNEL_MESSAGE: u8 = 4;

/// Ephemeral message flag: only the interacting user sees the reply.
const FLAG_EPHEMERAL: u64 = 64;

#[derive(Debug, Deserialize)]
struct InteractionPayload {
    #[serde(rename = "type")]
    kind: u8,
    data: Option<InteractionData>,
    member: Option<InteractionMember>,
    user: Option<InteractionUser>,
}

#[derive(Debug, Deserialize)]
struct InteractionData {
    custom_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InteractionMember {
    user: InteractionUser,
}

#[derive(Debug, Deserialize)]
struct InteractionUser {
    id: String,
}

impl InteractionPayload {
    fn user_id(&self) -> Option<&str> {
        self.member
            .as_ref()
            .map(|member| member.user.id.as_str())
            .or_else(|| self.user.as_ref().map(|user| user.id.as_str()))
    }
}

fn verify_interaction_signature(
    public_key_hex: &str,
    timestamp: &str,
    body: &[u8],
    signature_hex: &str,
) -> bool {
    let Ok(key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(key_array) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_array) else {
        return false;
    };

    let Ok(signature_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature_array) = <[u8; 64]>::try_from(signature_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature_array);

    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);

    key.verify(&message, &signature).is_ok()
}

fn ephemeral(content: String) -> Json<Value> {
    Json(json!({
        "type": RESPONSE_CHANNEL_MESSAGE,
        "data": { "content": content, "flags": FLAG_EPHEMERAL },
    }))
}

pub async fn discord_interaction_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Value>, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get("x-signature-ed25519")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let timestamp = parts
        .headers
        .get("x-signature-timestamp")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_interaction_signature(&state.discord_public_key, timestamp, &bytes, signature) {
        error!("invalid interaction signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let payload: InteractionPayload =
        serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)?;

    if payload.kind == INTERACTION_PING {
        return Ok(Json(json!({ "type": RESPONSE_PONG })));
    }

    if payload.kind != INTERACTION_MESSAGE_COMPONENT {
        return Ok(ephemeral("Nothing to do for this interaction.".to_string()));
    }

    let custom_id = payload
        .data
        .as_ref()
        .and_then(|data| data.custom_id.as_deref())
        .unwrap_or_default();
    let Some(issue_id) = custom_id.strip_prefix(REWARD_CUSTOM_ID_PREFIX) else {
        return Ok(ephemeral("Unrecognized control.".to_string()));
    };
    let Some(user_id) = payload.user_id() else {
        return Ok(ephemeral("Could not tell who clicked.".to_string()));
    };

    match threads::confirm_reward(state.store.as_ref(), issue_id, user_id).await {
        Ok(issue) => {
            info!("reward confirmed via interaction for issue {issue_id}");
            let response = if issue.rewarded {
                "Receipt confirmed. All assignees have now been rewarded — \
                 this bounty is fully paid out."
            } else {
                "Receipt confirmed. Waiting on the remaining assignees."
            };
            stats::spawn_issue_recompute(state.clone(), issue);
            Ok(ephemeral(response.to_string()))
        }
        Err(e) => {
            // Misuse is surfaced, not swallowed: the user attempted an
            // invalid confirmation and should see why.
            info!("rejected reward confirmation for issue {issue_id}: {e}");
            Ok(ephemeral(format!("Could not confirm the reward: {e}")))
        }
    }
}

pub fn interactions_router() -> Router<Arc<AppState>> {
    Router::new().route("/discord/interactions", post(discord_interaction_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::records::{Assignee, IssuePatch, LinkedUser};
    use crate::store::{BountyStore, MemoryStore};
    use crate::testing::{MockDiscord, MockGitHub};
    use axum::body::Body;
    use chrono::Utc;
    use ed25519_dalek::{Signer, SigningKey};
    use tower::ServiceExt;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn app_state(store: MemoryStore) -> Arc<AppState> {
        Arc::new(AppState {
            store: Arc::new(store),
            github: Arc::new(MockGitHub::new()),
            discord: Arc::new(MockDiscord::new()),
            webhook_secret: "secret".into(),
            discord_public_key: hex::encode(signing_key().verifying_key().to_bytes()),
            bounty_channel_id: "chan-1".into(),
        })
    }

    fn signed_request(body: &str) -> axum::http::Request<Body> {
        let timestamp = "1700000000";
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body.as_bytes());
        let signature = signing_key().sign(&message);

        axum::http::Request::builder()
            .method("POST")
            .uri("/discord/interactions")
            .header("x-signature-ed25519", hex::encode(signature.to_bytes()))
            .header("x-signature-timestamp", timestamp)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn response_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let state = app_state(MemoryStore::new());
        let app = interactions_router().with_state(state);

        let response = app
            .oneshot(signed_request(r#"{"type":1}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["type"], 1);
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let state = app_state(MemoryStore::new());
        let app = interactions_router().with_state(state);

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/discord/interactions")
            .header("x-signature-ed25519", hex::encode([0u8; 64]))
            .header("x-signature-timestamp", "1700000000")
            .body(Body::from(r#"{"type":1}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn reward_button_confirms_and_reports_misuse() {
        let store = MemoryStore::new();
        store
            .create_or_update_issue(IssuePatch {
                issue_id: "I_42".into(),
                number: Some(7),
                price: Some(100),
                solved: Some(true),
                assignees: Some(vec![Assignee {
                    login: "alice".into(),
                    avatar_url: None,
                    rewarded: false,
                    assigned_at: Utc::now(),
                }]),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .upsert_user(LinkedUser {
                login: "alice".into(),
                github_id: None,
                discord_id: Some("d-alice".into()),
                reward_total: 0,
            })
            .await
            .unwrap();
        let state = app_state(store);

        let click = r#"{
            "type": 3,
            "data": { "custom_id": "received_reward_I_42" },
            "member": { "user": { "id": "d-alice" } }
        }"#;

        let app = interactions_router().with_state(state.clone());
        let response = app.oneshot(signed_request(click)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["type"], 4);
        assert!(json["data"]["content"]
            .as_str()
            .unwrap()
            .contains("fully paid out"));

        let issue = state.store.issue("I_42").await.unwrap().unwrap();
        assert!(issue.rewarded);

        // Clicking again is a visible failure, not a silent no-op.
        let app = interactions_router().with_state(state.clone());
        let response = app.oneshot(signed_request(click)).await.unwrap();
        let json = response_json(response).await;
        assert!(json["data"]["content"]
            .as_str()
            .unwrap()
            .contains("already confirmed"));
    }
}
