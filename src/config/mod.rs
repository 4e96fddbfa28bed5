use std::time::Duration;

use serde::Deserialize;

use crate::services::worker::WorkerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Unused by worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the job store and work queue
    pub redis_url: String,

    /// Namespace for every Redis key this service writes
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Base URL of the OCR inference service
    pub ocr_service_url: String,

    /// Model id reported for structured requests that omit one
    #[serde(default = "default_model_id")]
    pub default_model_id: String,

    /// Stable identity of a worker process, unique per process and unchanged
    /// across its restarts. In-flight items are reclaimed per identity, so two
    /// processes sharing one id would requeue each other's running jobs.
    /// Required by the worker binary; the API ignores it.
    #[serde(default)]
    pub worker_id: Option<String>,

    /// Concurrent worker loops per worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_dequeue_timeout_secs")]
    pub dequeue_timeout_secs: u64,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Largest download or inline payload accepted, in bytes
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: usize,

    /// Unset means inference runs without a deadline
    #[serde(default)]
    pub inference_timeout_secs: Option<u64>,

    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,

    /// How long a sent callback suppresses duplicates
    #[serde(default = "default_callback_dedup_ttl_secs")]
    pub callback_dedup_ttl_secs: u64,

    /// Send an `in_progress` callback when a job starts
    #[serde(default)]
    pub progress_callbacks: bool,

    /// Request body limit for admission, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_key_prefix() -> String {
    "ocr".to_string()
}

fn default_model_id() -> String {
    "paddleocr-vl".to_string()
}

fn default_worker_concurrency() -> usize {
    1
}

fn default_dequeue_timeout_secs() -> u64 {
    5
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_max_download_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_callback_timeout_secs() -> u64 {
    15
}

fn default_callback_dedup_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            dequeue_timeout: Duration::from_secs(self.dequeue_timeout_secs),
            inference_timeout: self.inference_timeout_secs.map(Duration::from_secs),
            progress_callbacks: self.progress_callbacks,
            ..WorkerConfig::default()
        }
    }

    /// Queue consumer ids for this process's worker loops, one per loop.
    /// `None` when `WORKER_ID` is unset.
    pub fn consumer_ids(&self) -> Option<Vec<String>> {
        let worker_id = self.worker_id.as_deref()?;
        Some(
            (0..self.worker_concurrency.max(1))
                .map(|n| format!("{worker_id}-{n}"))
                .collect(),
        )
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    pub fn callback_dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.callback_dedup_ttl_secs)
    }
}
