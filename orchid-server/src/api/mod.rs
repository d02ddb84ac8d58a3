//! API Module
//!
//! HTTP API layer of the server.
//! Each submodule handles endpoints for a specific concern.

pub mod auth;
pub mod error;
pub mod execution;
pub mod health;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use orchid_engine::LocalDispatcher;
use tower_http::trace::TraceLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: LocalDispatcher,
    pub secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(dispatcher: LocalDispatcher, secret: Option<String>) -> Self {
        Self {
            dispatcher,
            secret: secret.map(Arc::from),
        }
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        // Execution endpoints
        .route("/runs/{job_id}", post(execution::run_job))
        .route("/logs/list", get(execution::list_executions))
        .route("/logs/{id}", get(execution::stream_output))
        .route("/logs/{id}/status", get(execution::get_execution))
        .route("/logs/{id}/cancel", post(execution::cancel_execution))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_secret,
        ));

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .merge(protected)
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
