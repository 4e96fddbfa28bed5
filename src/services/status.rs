use crate::models::job::JobStatus;
use crate::models::request::JobView;
use crate::store::{JobStore, StoreError};

/// Current status of a job.
pub async fn job_status(store: &dyn JobStore, job_id: &str) -> Result<JobView, QueryError> {
    let job = store
        .get(job_id)
        .await?
        .ok_or_else(|| QueryError::NotFound(job_id.to_string()))?;
    Ok(JobView {
        job_id: job.id,
        status: job.status,
        result: None,
        error: None,
    })
}

/// Status plus result once finished. A failed job surfaces as
/// [`QueryError::JobFailed`] carrying the stored message.
pub async fn job_result(store: &dyn JobStore, job_id: &str) -> Result<JobView, QueryError> {
    let job = store
        .get(job_id)
        .await?
        .ok_or_else(|| QueryError::NotFound(job_id.to_string()))?;
    match job.status {
        JobStatus::Finished => Ok(JobView {
            job_id: job.id,
            status: job.status,
            result: job.result,
            error: None,
        }),
        JobStatus::Failed => Err(QueryError::JobFailed {
            job_id: job.id,
            message: job.error.unwrap_or_else(|| "job failed".to_string()),
        }),
        JobStatus::Queued | JobStatus::Running => Ok(JobView {
            job_id: job.id,
            status: job.status,
            result: None,
            error: None,
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Job store unavailable: {0}")]
    Store(#[from] StoreError),
}
