use std::collections::BTreeMap;
use std::sync::Arc;

use garde::Validate;
use uuid::Uuid;

use crate::models::job::{
    CallbackTarget, Contract, Job, JobInput, JobUpdate, NormalizedInput, WorkItem,
};
use crate::models::request::SubmitRequest;
use crate::services::queue::{QueueError, WorkQueue};
use crate::store::{JobStore, StoreError};

/// Result of an admission call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub job_id: String,
    /// `false` when the idempotency key matched an existing job.
    pub created: bool,
}

/// A request after validation and normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRequest {
    pub input: JobInput,
    pub callback: Option<CallbackTarget>,
    pub idempotency_key: Option<String>,
}

/// Accepts new jobs: one store record and one queue entry per job id.
pub struct AdmissionController {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    default_model_id: String,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn WorkQueue>, default_model_id: &str) -> Self {
        Self {
            store,
            queue,
            default_model_id: default_model_id.to_string(),
        }
    }

    pub async fn admit(&self, request: SubmitRequest) -> Result<Admitted, AdmissionError> {
        let request = normalize(request, &self.default_model_id)?;

        if let Some(key) = &request.idempotency_key {
            if self.store.get(key).await?.is_some() {
                tracing::info!(job_id = %key, "Idempotency key matched existing job");
                return Ok(Admitted {
                    job_id: key.clone(),
                    created: false,
                });
            }
        }

        let job_id = request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let job = Job::queued(job_id.clone(), request.input.clone(), request.callback.clone());

        // Lost a race with a concurrent admission using the same key.
        if !self.store.create(&job).await? {
            return Ok(Admitted {
                job_id,
                created: false,
            });
        }

        let item = WorkItem {
            job_id: job_id.clone(),
            input: request.input,
            callback: request.callback,
        };
        if let Err(e) = self.queue.push(&item).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to enqueue admitted job");
            if let Err(store_err) = self
                .store
                .put(&job_id, &JobUpdate::failed(format!("Failed to enqueue job: {e}")))
                .await
            {
                tracing::error!(job_id = %job_id, error = %store_err, "Failed to mark unqueued job as failed");
            }
            return Err(AdmissionError::Queue(e));
        }

        metrics::counter!("ocr_jobs_admitted").increment(1);
        tracing::info!(
            job_id = %job_id,
            kind = input_kind(&item.input.source),
            has_callback = item.callback.is_some(),
            "Job admitted"
        );

        Ok(Admitted {
            job_id,
            created: true,
        })
    }
}

fn input_kind(source: &NormalizedInput) -> &'static str {
    match source {
        NormalizedInput::ResourceUrl(_) => "resource_url",
        NormalizedInput::InlineImage(_) => "inline_image",
    }
}

/// Validate a raw request and fold legacy and structured shapes into one.
pub fn normalize(request: SubmitRequest, default_model_id: &str) -> Result<NormalizedRequest, AdmissionError> {
    request
        .validate()
        .map_err(|e| AdmissionError::InvalidInput(e.to_string()))?;

    let SubmitRequest {
        url,
        pdf_url,
        image_url,
        image_base64,
        input,
        model_id,
        execution_id,
        callback_url,
        callback_token,
        callback_headers,
        idempotency_key,
    } = request;

    let (source, contract) = match input {
        Some(structured) => {
            if url.is_some() || pdf_url.is_some() || image_url.is_some() || image_base64.is_some() {
                return Err(AdmissionError::InvalidInput(
                    "top-level locators cannot be combined with a structured input".to_string(),
                ));
            }
            let execution_id = execution_id.ok_or_else(|| {
                AdmissionError::InvalidInput("execution_id is required with a structured input".to_string())
            })?;
            if callback_url.is_none() {
                return Err(AdmissionError::InvalidInput(
                    "callback_url is required with a structured input".to_string(),
                ));
            }
            let source = match (structured.url, structured.image_data) {
                (Some(url), None) => NormalizedInput::ResourceUrl(url),
                (None, Some(data)) => NormalizedInput::InlineImage(data),
                (Some(_), Some(_)) => {
                    return Err(AdmissionError::InvalidInput(
                        "provide exactly one of input.url or input.image_data".to_string(),
                    ))
                }
                (None, None) if structured.text.is_some() => {
                    return Err(AdmissionError::InvalidInput(
                        "text input is not supported; provide input.url or input.image_data".to_string(),
                    ))
                }
                (None, None) => {
                    return Err(AdmissionError::InvalidInput(
                        "input.url or input.image_data is required".to_string(),
                    ))
                }
            };
            let contract = Contract::Structured {
                model_id: model_id.unwrap_or_else(|| default_model_id.to_string()),
                execution_id,
            };
            (source, contract)
        }
        None => {
            let locators: Vec<String> = [url, pdf_url, image_url].into_iter().flatten().collect();
            let source = match (locators.len(), image_base64) {
                (1, None) => NormalizedInput::ResourceUrl(locators.into_iter().next().unwrap_or_default()),
                (0, Some(data)) => NormalizedInput::InlineImage(data),
                (0, None) => {
                    return Err(AdmissionError::InvalidInput(
                        "provide one of url, pdf_url, image_url or image_base64".to_string(),
                    ))
                }
                _ => {
                    return Err(AdmissionError::InvalidInput(
                        "provide exactly one resource locator or inline image".to_string(),
                    ))
                }
            };
            (source, Contract::Legacy)
        }
    };

    // Header names are case-insensitive; lowercase them so the token and
    // execution id below replace any caller-supplied duplicates.
    let callback = callback_url.map(|url| {
        let mut headers: BTreeMap<String, String> = callback_headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        if let Some(token) = callback_token {
            headers.insert("authorization".to_string(), format!("Bearer {token}"));
        }
        if let Contract::Structured { execution_id, .. } = &contract {
            headers.insert("x-execution-id".to_string(), execution_id.clone());
        }
        CallbackTarget { url, headers }
    });

    Ok(NormalizedRequest {
        input: JobInput { source, contract },
        callback,
        idempotency_key,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Work queue unavailable: {0}")]
    Queue(#[from] QueueError),
}
