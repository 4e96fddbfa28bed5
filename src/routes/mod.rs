use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;

/// Job API routes, without middleware or the metrics endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/infer", post(jobs::submit_job))
        .route("/jobs", post(jobs::submit_job))
        .route("/jobs/{job_id}", get(jobs::get_job_status))
        .route("/jobs/{job_id}/result", get(jobs::get_job_result))
        .with_state(state)
}
