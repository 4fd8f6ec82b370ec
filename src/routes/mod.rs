use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod checks;
pub mod health;
pub mod metrics;

/// Health, submission and lookup routes. `/metrics` is mounted separately
/// because it carries its own state.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/checks", post(checks::submit_check))
        .route("/api/v1/checks/{job_id}", get(checks::get_check_status))
        .route("/api/v1/accounts/{handle}", get(checks::get_account))
        .with_state(state)
}
