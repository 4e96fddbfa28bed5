use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{JobStore, PutOutcome, StoreError};
use crate::models::job::{Job, JobUpdate};

/// In-process job store. Only valid when every API handler and worker share
/// one process.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
    claims: Mutex<HashMap<String, Instant>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Ok(false);
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(true)
    }

    async fn put(&self, job_id: &str, update: &JobUpdate) -> Result<PutOutcome, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(PutOutcome::Missing);
        };
        if job.status.is_terminal() {
            return Ok(PutOutcome::Rejected);
        }

        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(result) = &update.result {
            job.result = Some(result.clone());
        }
        if let Some(error) = &update.error {
            job.error = Some(error.clone());
        }
        if job.started_at.is_none() {
            job.started_at = update.started_at;
        }
        if job.finished_at.is_none() {
            job.finished_at = update.finished_at;
        }
        Ok(PutOutcome::Applied)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().await.get(job_id).cloned())
    }

    async fn claim_once(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut claims = self.claims.lock().await;
        claims.retain(|_, expires| *expires > now);
        if claims.contains_key(key) {
            return Ok(false);
        }
        claims.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{Contract, JobInput, JobStatus, NormalizedInput};

    fn job(id: &str) -> Job {
        Job::queued(
            id.to_string(),
            JobInput {
                source: NormalizedInput::ResourceUrl("https://a/b.pdf".to_string()),
                contract: Contract::Legacy,
            },
            None,
        )
    }

    #[tokio::test]
    async fn test_create_is_insert_if_absent() {
        let store = MemoryJobStore::new();
        assert!(store.create(&job("a")).await.unwrap());
        assert!(!store.create(&job("a")).await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_put_keeps_unrelated_fields() {
        let store = MemoryJobStore::new();
        let original = job("a");
        store.create(&original).await.unwrap();

        store.put("a", &JobUpdate::running()).await.unwrap();
        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.input, original.input);
        assert!(stored.started_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_record_rejects_updates() {
        let store = MemoryJobStore::new();
        store.create(&job("a")).await.unwrap();
        store.put("a", &JobUpdate::running()).await.unwrap();
        let finished = store
            .put("a", &JobUpdate::finished(serde_json::json!({"markdown": "x"})))
            .await
            .unwrap();
        assert_eq!(finished, PutOutcome::Applied);
        let finished_at = store.get("a").await.unwrap().unwrap().finished_at;

        let outcome = store.put("a", &JobUpdate::running()).await.unwrap();
        assert_eq!(outcome, PutOutcome::Rejected);
        let outcome = store.put("a", &JobUpdate::failed("late")).await.unwrap();
        assert_eq!(outcome, PutOutcome::Rejected);

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Finished);
        assert!(stored.error.is_none());
        assert_eq!(stored.finished_at, finished_at);
    }

    #[tokio::test]
    async fn test_started_at_is_write_once() {
        let store = MemoryJobStore::new();
        store.create(&job("a")).await.unwrap();
        store.put("a", &JobUpdate::running()).await.unwrap();
        let first = store.get("a").await.unwrap().unwrap().started_at;

        tokio::time::sleep(Duration::from_millis(5)).await;
        store.put("a", &JobUpdate::running()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().started_at, first);
    }

    #[tokio::test]
    async fn test_put_on_unknown_job_is_missing() {
        let store = MemoryJobStore::new();
        let outcome = store.put("nope", &JobUpdate::running()).await.unwrap();
        assert_eq!(outcome, PutOutcome::Missing);
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_once_expires() {
        let store = MemoryJobStore::new();
        assert!(store.claim_once("k", Duration::from_millis(20)).await.unwrap());
        assert!(!store.claim_once("k", Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.claim_once("k", Duration::from_millis(20)).await.unwrap());
    }
}
