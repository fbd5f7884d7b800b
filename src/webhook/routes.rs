//! HTTP surface — webhook and health endpoints.
//!
//! The webhook handler is deliberately thin: authenticate, normalize,
//! dedup, hand off to the router, answer. Anything that fails after the
//! idempotency marker is recorded still returns 200 — a 5xx would trigger
//! gateway re-delivery that the ledger would then swallow, silently losing
//! the message.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use secrecy::{ExposeSecret, SecretString};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::idempotency::{self, IdempotencyLedger};
use crate::pipeline::router::{MessageRouter, RouteOutcome};
use crate::webhook::payload;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<MessageRouter>,
    pub ledger: Arc<IdempotencyLedger>,
    pub webhook_token: SecretString,
}

/// Build the Axum router with webhook and health routes.
pub fn webhook_routes(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Check the static bearer token.
fn authorized(headers: &HeaderMap, token: &SecretString) -> bool {
    let expected = format!("Bearer {}", token.expose_secret());
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false)
}

// ── Health ──────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers, &state.webhook_token) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"ok": false, "error": "unauthorized"})),
        );
    }
    (
        StatusCode::OK,
        Json(serde_json::json!({"ok": true, "status": "ok", "service": "kawal-obat"})),
    )
}

// ── Webhook ─────────────────────────────────────────────────────────

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    if !authorized(&headers, &state.webhook_token) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"ok": false, "error": "unauthorized"})),
        );
    }

    // Validation errors → 400 with field-level issues. Nothing mutated yet.
    let event = match payload::normalize(&body) {
        Ok(event) => event,
        Err(e) => {
            debug!(issues = ?e.issues, "Rejected malformed webhook payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "ok": false,
                    "error": "validation",
                    "issues": e.issues,
                })),
            );
        }
    };

    // Dedup — the sole concurrency control point. Duplicates are healthy
    // gateway behavior, not an error.
    let fingerprint = idempotency::fingerprint(&event);
    if state.ledger.is_duplicate(&fingerprint).await {
        info!(sender = %event.sender, "Duplicate delivery suppressed");
        return (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "duplicate": true})),
        );
    }

    match state.router.handle_event(&event).await {
        Ok(outcome) => {
            let (result, detail) = outcome_labels(&outcome);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "ok": true,
                    "duplicate": false,
                    "result": result,
                    "detail": detail,
                })),
            )
        }
        Err(e) => {
            // The marker is already recorded; a non-200 here would turn a
            // transient failure into a permanently lost message.
            error!(error = %e, sender = %event.sender, "Pipeline error while routing event");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "ok": true,
                    "duplicate": false,
                    "result": "error_logged",
                })),
            )
        }
    }
}

fn outcome_labels(outcome: &RouteOutcome) -> (&'static str, String) {
    match outcome {
        RouteOutcome::Ignored { reason } => ("ignored", reason.clone()),
        RouteOutcome::Verification(v) => ("verification", v.label().to_string()),
        RouteOutcome::Confirmation(c) => ("confirmation", c.label().to_string()),
        RouteOutcome::Classified {
            intent,
            escalated,
            ..
        } => (
            "classified",
            if *escalated {
                format!("{}+escalated", intent.as_str())
            } else {
                intent.as_str().to_string()
            },
        ),
        RouteOutcome::Fallback => ("fallback", "generic_ack".to_string()),
    }
}
