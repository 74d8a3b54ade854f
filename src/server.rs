use axum::{middleware as axum_mw, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::metrics::stream;
use crate::middleware::timing;
use crate::AppState;

/// Builds the status `Router`.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Status ──────────────────────────────────────────────
        .route("/monitor", get(stream::get_status))
        .route("/monitor/stream", get(stream::status_stream))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}
