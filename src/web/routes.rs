use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            .route("/query", post(handlers::api::query))
            .route("/health", get(handlers::api::health))
            .route("/examples", get(handlers::api::examples))
            .route("/history", get(handlers::api::history)),
    )
}
