//! Shared job state.
//!
//! Every API and worker process reads and writes job records through a
//! [`JobStore`]. Production uses [`redis_store::RedisJobStore`]; the
//! [`memory::MemoryJobStore`] backs tests and single-process development.

use std::time::Duration;

use async_trait::async_trait;

use crate::models::job::{Job, JobUpdate};

pub mod memory;
pub mod redis_store;

/// Result of merging an update into a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Applied,
    /// The record is already terminal; nothing was written.
    Rejected,
    /// No record exists for the id.
    Missing,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record unless one already exists. Returns `true` when inserted.
    async fn create(&self, job: &Job) -> Result<bool, StoreError>;

    /// Merge `update` into an existing record.
    ///
    /// Terminal records are never modified, and `started_at`/`finished_at` are
    /// only written when unset.
    async fn put(&self, job_id: &str, update: &JobUpdate) -> Result<PutOutcome, StoreError>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Atomically set `key` with an expiry if it is not already set.
    /// Returns `true` for the caller that set it.
    async fn claim_once(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt job record {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },
}
