//! Axum router construction.
//!
//! Assembles the subscribe and add routes into a single [`Router`] with
//! request tracing and permissive CORS.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router.
///
/// - `GET /` -- ndjson snapshot + patch stream
/// - `GET /add?task=…` -- create a todo
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::subscribe))
        .route("/add", get(handlers::add_todo))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
