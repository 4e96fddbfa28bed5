use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;

use crate::app_state::AppState;
use crate::models::job::JobStatus;
use crate::models::request::{JobView, SubmitRequest, SubmitResponse};
use crate::routes::error::ApiError;
use crate::services::admission::AdmissionError;
use crate::services::status;

/// POST /infer, POST /jobs: admit a document for OCR.
pub async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(request) = body.map_err(|e| AdmissionError::InvalidInput(e.body_text()))?;
    let admitted = state.admission.admit(request).await?;
    Ok(Json(SubmitResponse {
        job_id: admitted.job_id,
        status: JobStatus::Queued,
    }))
}

/// GET /jobs/{job_id}
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    Ok(Json(status::job_status(state.store.as_ref(), &job_id).await?))
}

/// GET /jobs/{job_id}/result
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    Ok(Json(status::job_result(state.store.as_ref(), &job_id).await?))
}
