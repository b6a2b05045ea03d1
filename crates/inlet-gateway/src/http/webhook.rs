//! Webhook ingress endpoint: POST /webhook.
//!
//! Authenticates the shared secret, normalizes the Telegram update and runs it
//! through the pipeline. The response never waits for dispatch.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use inlet_core::config::SECRET_TOKEN_HEADER;
use inlet_ingest::{IngestError, IngestOutcome};
use inlet_telegram::Normalized;

use crate::app::AppState;

/// POST /webhook
///
/// 401 on secret mismatch, 400 on an undecodable body, 503 when the admission
/// gate is saturated, otherwise 200 with an optional `note` naming the
/// short-circuit that applied.
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if let Some(secret) = &state.secret {
        let presented = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if let Err(reason) = secret.verify(presented) {
            warn!(reason, "webhook authentication failed");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "authentication failed"})),
            );
        }
    }

    let envelope = match inlet_telegram::normalize_body(&body) {
        Ok(Normalized::Envelope(envelope)) => envelope,
        Ok(Normalized::Ignored { update_id, reason }) => {
            debug!(update_id = %update_id, reason, "update ignored");
            return ok_with_note(Some("ignored"));
        }
        Err(e) => {
            let err = IngestError::from(e);
            warn!(error = %err, bytes = body.len(), "rejecting malformed webhook body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": err.to_string(), "code": err.code()})),
            );
        }
    };

    match state.pipeline.ingest(envelope) {
        IngestOutcome::Busy => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "service busy"})),
        ),
        outcome => ok_with_note(outcome.note()),
    }
}

fn ok_with_note(note: Option<&str>) -> (StatusCode, Json<Value>) {
    let body = match note {
        Some(note) => json!({"status": "ok", "note": note}),
        None => json!({"status": "ok"}),
    };
    (StatusCode::OK, Json(body))
}
