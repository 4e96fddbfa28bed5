use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::admission::AdmissionError;
use crate::services::status::QueryError;

/// Errors surfaced by the HTTP layer, each mapped to a status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Admission(AdmissionError::InvalidInput(msg)) => {
                json_error(StatusCode::BAD_REQUEST, "invalid_input", msg)
            }
            ApiError::Admission(e) => {
                tracing::error!(error = %e, "Admission failed");
                json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", e.to_string())
            }
            ApiError::Query(QueryError::NotFound(job_id)) => json_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("job {job_id} not found"),
            ),
            ApiError::Query(QueryError::JobFailed { job_id, message }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "job_id": job_id,
                    "status": "failed",
                    "error": message,
                })),
            )
                .into_response(),
            ApiError::Query(QueryError::Store(e)) => {
                tracing::error!(error = %e, "Job store query failed");
                json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", e.to_string())
            }
        }
    }
}

fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
