use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;

use crate::models::job::CallbackTarget;
use crate::models::result::CallbackPayload;
use crate::store::{JobStore, StoreError};

/// Outcome of a single notification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// Another attempt already claimed this (job, status) pair.
    Suppressed,
    Failed(String),
}

/// Posts job outcomes to caller endpoints, at most once per (job, status).
pub struct CallbackDispatcher {
    http: Client,
    store: Arc<dyn JobStore>,
    dedup_ttl: Duration,
}

impl CallbackDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        timeout: Duration,
        dedup_ttl: Duration,
    ) -> Result<Self, CallbackError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(CallbackError::Http)?;
        Ok(Self {
            http,
            store,
            dedup_ttl,
        })
    }

    pub fn dedup_key(job_id: &str, status: &str) -> String {
        format!("callback:{job_id}:{status}")
    }

    /// Claim the dedup key, then POST once. Delivery failures are reported in
    /// the outcome and never retried.
    pub async fn notify(
        &self,
        payload: &CallbackPayload,
        target: &CallbackTarget,
    ) -> Result<NotifyOutcome, CallbackError> {
        let key = Self::dedup_key(&payload.job_id, &payload.status);
        if !self.store.claim_once(&key, self.dedup_ttl).await? {
            tracing::debug!(
                job_id = %payload.job_id,
                status = %payload.status,
                "Callback already sent, suppressing duplicate"
            );
            return Ok(NotifyOutcome::Suppressed);
        }

        let outcome = match self.post(payload, target).await {
            Ok(()) => {
                tracing::info!(
                    job_id = %payload.job_id,
                    status = %payload.status,
                    callback_url = %target.url,
                    "Callback delivered"
                );
                NotifyOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %payload.job_id,
                    status = %payload.status,
                    callback_url = %target.url,
                    error = %e,
                    "Callback delivery failed"
                );
                metrics::counter!("ocr_callbacks_failed").increment(1);
                NotifyOutcome::Failed(e.to_string())
            }
        };
        Ok(outcome)
    }

    async fn post(&self, payload: &CallbackPayload, target: &CallbackTarget) -> Result<(), CallbackError> {
        let response = self
            .http
            .post(&target.url)
            .headers(build_headers(target))
            .json(payload)
            .send()
            .await
            .map_err(CallbackError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallbackError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

/// Caller headers that are not valid HTTP headers are skipped.
fn build_headers(target: &CallbackTarget) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &target.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid callback header"),
        }
    }
    headers
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("Callback request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Callback endpoint responded with status {0}")]
    Rejected(u16),

    #[error("Dedup store unavailable: {0}")]
    Store(#[from] StoreError),
}
