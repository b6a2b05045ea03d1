use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe with pipeline counters.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.pipeline.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "capacity": stats.capacity,
        "in_flight": stats.in_flight,
        "buffered_conversations": stats.buffered_conversations,
        "tracked_updates": stats.tracked_updates,
        "pending_updates": stats.pending_updates,
        "tracked_senders": stats.tracked_senders,
    }))
}
