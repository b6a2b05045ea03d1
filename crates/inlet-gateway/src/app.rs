use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use inlet_core::InletConfig;
use inlet_ingest::Pipeline;

use crate::secret::SecretToken;

/// Central shared state, passed as `Arc<AppState>` to all handlers.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// `None` when no secret is configured; the header is then not checked.
    pub secret: Option<SecretToken>,
}

impl AppState {
    pub fn new(config: &InletConfig, pipeline: Arc<Pipeline>) -> Result<Self, String> {
        let secret = config
            .gateway
            .secret_token
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(SecretToken::new)
            .transpose()?;
        Ok(Self { pipeline, secret })
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/webhook", post(crate::http::webhook::webhook_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
