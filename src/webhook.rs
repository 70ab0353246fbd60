//! Inbound GitHub webhook endpoint.
//!
//! A middleware verifies the `X-Hub-Signature-256` HMAC before any payload
//! is parsed; the handler then hands the event to the router inside a
//! spawned task, so one event's failure is logged and absorbed without
//! crashing the process or blocking later deliveries.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::events::{self, payload::WebhookPayload, Outcome};
use crate::AppState;

#[derive(Clone)]
pub struct CorrelationId(pub String);

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

type HmacSha256 = Hmac<Sha256>;

fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    // Constant-time comparison.
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let correlation_id = CorrelationId(Uuid::new_v4().to_string());

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let mut new_request = Request::from_parts(parts, axum::body::Body::from(bytes));
    new_request.extensions_mut().insert(correlation_id);

    Ok(next.run(new_request).await)
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let event = request
        .headers()
        .get("x-github-event")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::BAD_REQUEST)?
        .to_string();

    let (_parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let payload: WebhookPayload =
        serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)?;

    let action = payload.action.clone().unwrap_or_default();
    info!("[{correlation_id}] received {event}.{action}");

    // Error isolation boundary: a failing handler must not take down the
    // process or block delivery of independent events.
    tokio::spawn(async move {
        match events::dispatch(&state, &event, &payload).await {
            Ok(Outcome::Completed) => {
                info!("[{correlation_id}] {event}.{action} completed");
            }
            Ok(Outcome::Skipped(skip)) => {
                info!("[{correlation_id}] {event}.{action} skipped: {skip}");
            }
            Err(e) => {
                error!("[{correlation_id}] handler for {event}.{action} failed: {e:#}");
            }
        }
    });

    Ok(Json(WebhookResponse {
        message: "Webhook received".to_string(),
    }))
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{MockDiscord, MockGitHub};
    use axum::body::Body;
    use tower::ServiceExt;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn app_state() -> Arc<AppState> {
        Arc::new(AppState {
            store: Arc::new(MemoryStore::new()),
            github: Arc::new(MockGitHub::new()),
            discord: Arc::new(MockDiscord::new()),
            webhook_secret: "test-secret".into(),
            discord_public_key: String::new(),
            bounty_channel_id: "chan-1".into(),
        })
    }

    #[test]
    fn signature_verification_accepts_valid() {
        let payload = br#"{"action":"opened"}"#;
        let signature = sign("test-secret", payload);
        assert!(verify_github_signature("test-secret", payload, &signature));
    }

    #[test]
    fn signature_verification_rejects_bad_inputs() {
        let payload = br#"{"action":"opened"}"#;
        let signature = sign("test-secret", payload);

        assert!(!verify_github_signature("other-secret", payload, &signature));
        assert!(!verify_github_signature(
            "test-secret",
            b"tampered",
            &signature
        ));
        assert!(!verify_github_signature("test-secret", payload, "sha256=zz"));
        assert!(!verify_github_signature(
            "test-secret",
            payload,
            "sha1=abcdef"
        ));
    }

    #[tokio::test]
    async fn unsigned_request_is_unauthorized() {
        let state = app_state();
        let app = webhook_router(state.clone()).with_state(state);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header("x-github-event", "issues")
                    .body(Body::from(r#"{"action":"opened"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_request_is_accepted() {
        let state = app_state();
        let app = webhook_router(state.clone()).with_state(state);

        let payload = br#"{"action":"opened"}"#;
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header("x-github-event", "issues")
                    .header("x-hub-signature-256", sign("test-secret", payload))
                    .body(Body::from(payload.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_event_header_is_bad_request() {
        let state = app_state();
        let app = webhook_router(state.clone()).with_state(state);

        let payload = br#"{"action":"opened"}"#;
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header("x-hub-signature-256", sign("test-secret", payload))
                    .body(Body::from(payload.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
