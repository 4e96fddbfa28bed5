//! The worker loop: pop a work item, run it to a terminal state, notify.
//!
//! Job failures (download, decode, inference) are recorded on the job and never
//! stop the loop. Only store/queue outages surface as [`WorkerError`], and those
//! are retried with exponential backoff until shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::models::job::{CallbackTarget, Job, JobStatus, JobUpdate, WorkItem};
use crate::models::result::{CallbackPayload, EnvelopeError, ResultEnvelope};
use crate::services::callback::CallbackDispatcher;
use crate::services::fetch::{FetchError, ResourceFetcher};
use crate::services::ocr::{InferenceEngine, InferenceError};
use crate::services::queue::{Delivery, QueueError, WorkQueue};
use crate::store::{JobStore, PutOutcome, StoreError};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on a single blocking pop.
    pub dequeue_timeout: Duration,
    pub inference_timeout: Option<Duration>,
    /// Send a non-terminal `in_progress` callback when a job starts.
    pub progress_callbacks: bool,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_secs(5),
            inference_timeout: None,
            progress_callbacks: false,
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// What happened to one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    Finished,
    Failed,
    /// Duplicate delivery of a terminal job, or no record for the id.
    Skipped,
}

pub struct Worker {
    id: String,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    fetcher: Arc<dyn ResourceFetcher>,
    engine: Arc<dyn InferenceEngine>,
    callbacks: Arc<CallbackDispatcher>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        fetcher: Arc<dyn ResourceFetcher>,
        engine: Arc<dyn InferenceEngine>,
        callbacks: Arc<CallbackDispatcher>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            queue,
            fetcher,
            engine,
            callbacks,
            config,
        }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A job already being processed is always carried to completion before the
    /// loop observes shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);
        tracing::info!(worker_id = %self.id, "Worker started");

        loop {
            match self.queue.recover_in_flight().await {
                Ok(0) => break,
                Ok(recovered) => {
                    tracing::warn!(worker_id = %self.id, recovered, "Re-queued unfinished work items");
                    break;
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "Work queue unavailable, retrying");
                    if pause(&mut backoff, &mut shutdown).await {
                        return;
                    }
                }
            }
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            let popped = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                popped = self.queue.pop(self.config.dequeue_timeout) => popped,
            };

            match popped {
                Ok(Some(delivery)) => {
                    backoff.reset();
                    if !self.handle(delivery, &mut backoff, &mut shutdown).await {
                        break;
                    }
                    self.record_queue_depth().await;
                }
                Ok(None) => {
                    backoff.reset();
                    tracing::trace!(worker_id = %self.id, "No jobs available");
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "Work queue unavailable, backing off");
                    if pause(&mut backoff, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.id, "Worker stopped");
    }

    /// Pop and process at most one item. Returns `Ok(None)` when the queue
    /// stayed empty for the dequeue timeout.
    pub async fn run_once(&self) -> Result<Option<Processed>, WorkerError> {
        let Some(delivery) = self.queue.pop(self.config.dequeue_timeout).await? else {
            return Ok(None);
        };
        let processed = self.process(&delivery.item).await?;
        self.queue.ack(&delivery).await?;
        Ok(Some(processed))
    }

    /// Process and acknowledge, retrying store/queue outages. Returns `false`
    /// if shutdown was requested while retrying; the item then stays in flight
    /// and is recovered on the next start.
    async fn handle(
        &self,
        delivery: Delivery,
        backoff: &mut Backoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            let attempt = async {
                self.process(&delivery.item).await?;
                self.queue.ack(&delivery).await?;
                Ok::<_, WorkerError>(())
            };
            match attempt.await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::error!(
                        worker_id = %self.id,
                        job_id = %delivery.item.job_id,
                        error = %e,
                        "Backing service unavailable while processing job, retrying"
                    );
                    if pause(backoff, shutdown).await {
                        return false;
                    }
                }
            }
        }
    }

    /// Drive one work item to a terminal state.
    pub async fn process(&self, item: &WorkItem) -> Result<Processed, WorkerError> {
        let job_id = item.job_id.as_str();

        match self.mark_running(item).await? {
            PutOutcome::Applied => {}
            PutOutcome::Rejected => {
                tracing::info!(job_id = %job_id, "Job already terminal, skipping duplicate delivery");
                self.renotify_terminal(item).await?;
                return Ok(Processed::Skipped);
            }
            PutOutcome::Missing => {
                tracing::warn!(job_id = %job_id, "Job record vanished while running, dropping item");
                return Ok(Processed::Skipped);
            }
        }

        tracing::info!(
            worker_id = %self.id,
            job_id = %job_id,
            "Processing OCR job"
        );

        if self.config.progress_callbacks {
            if let Some(target) = &item.callback {
                let payload = CallbackPayload::in_progress(job_id, &item.input);
                self.dispatch(&payload, target).await;
            }
        }

        let start = Instant::now();
        let outcome = self.execute(item).await;
        let elapsed = start.elapsed();
        metrics::histogram!("ocr_job_processing_seconds").record(elapsed.as_secs_f64());

        let (update, payload, processed) = match outcome {
            Ok(result) => {
                tracing::info!(
                    job_id = %job_id,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job finished"
                );
                (
                    JobUpdate::finished(result.clone()),
                    CallbackPayload::finished(job_id, &item.input, result),
                    Processed::Finished,
                )
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    duration_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "Job failed"
                );
                let message = e.to_string();
                (
                    JobUpdate::failed(message.clone()),
                    CallbackPayload::failed(job_id, &item.input, message),
                    Processed::Failed,
                )
            }
        };

        match self.put_or_recreate(item, &update).await? {
            PutOutcome::Applied => {}
            PutOutcome::Rejected => {
                tracing::info!(job_id = %job_id, "Terminal state already recorded by another worker");
                return Ok(Processed::Skipped);
            }
            PutOutcome::Missing => {
                tracing::error!(job_id = %job_id, "Job record could not be recreated, result dropped");
                return Ok(Processed::Skipped);
            }
        }

        match processed {
            Processed::Finished => metrics::counter!("ocr_jobs_finished").increment(1),
            _ => metrics::counter!("ocr_jobs_failed").increment(1),
        }

        if let Some(target) = &item.callback {
            self.dispatch(&payload, target).await;
        }
        Ok(processed)
    }

    async fn mark_running(&self, item: &WorkItem) -> Result<PutOutcome, WorkerError> {
        self.put_or_recreate(item, &JobUpdate::running()).await
    }

    /// Apply `update`. A work item whose record is gone (evicted or flushed)
    /// recreates it from the item, which carries the full input.
    async fn put_or_recreate(
        &self,
        item: &WorkItem,
        update: &JobUpdate,
    ) -> Result<PutOutcome, WorkerError> {
        let outcome = self.store.put(&item.job_id, update).await?;
        if outcome != PutOutcome::Missing {
            return Ok(outcome);
        }

        tracing::warn!(job_id = %item.job_id, "No job record for work item, recreating it");
        let job = Job::queued(item.job_id.clone(), item.input.clone(), item.callback.clone());
        self.store.create(&job).await?;
        Ok(self.store.put(&item.job_id, update).await?)
    }

    async fn execute(&self, item: &WorkItem) -> Result<serde_json::Value, JobError> {
        let resource = self.fetcher.fetch(&item.input.source).await?;
        tracing::debug!(job_id = %item.job_id, bytes = resource.len(), "Input acquired");

        let output = match self.config.inference_timeout {
            Some(limit) => tokio::time::timeout(limit, self.engine.run(&resource))
                .await
                .map_err(|_| InferenceError::Timeout(limit.as_secs()))??,
            None => self.engine.run(&resource).await?,
        };

        let envelope = ResultEnvelope::build(&item.input, output)?;
        Ok(serde_json::to_value(envelope)?)
    }

    /// A redelivered terminal job may have crashed before its callback went
    /// out; dedup suppresses the resend if it did not.
    async fn renotify_terminal(&self, item: &WorkItem) -> Result<(), WorkerError> {
        let Some(target) = &item.callback else {
            return Ok(());
        };
        let Some(job) = self.store.get(&item.job_id).await? else {
            return Ok(());
        };
        if let Some(payload) = terminal_payload(&job) {
            self.dispatch(&payload, target).await;
        }
        Ok(())
    }

    async fn dispatch(&self, payload: &CallbackPayload, target: &CallbackTarget) {
        if let Err(e) = self.callbacks.notify(payload, target).await {
            tracing::warn!(job_id = %payload.job_id, error = %e, "Callback dispatch skipped");
        }
    }

    async fn record_queue_depth(&self) {
        if let Ok(depth) = self.queue.depth().await {
            metrics::gauge!("ocr_queue_depth").set(depth as f64);
        }
    }
}

fn terminal_payload(job: &Job) -> Option<CallbackPayload> {
    match job.status {
        JobStatus::Finished => Some(CallbackPayload::finished(
            &job.id,
            &job.input,
            job.result.clone().unwrap_or(serde_json::Value::Null),
        )),
        JobStatus::Failed => Some(CallbackPayload::failed(
            &job.id,
            &job.input,
            job.error.clone().unwrap_or_default(),
        )),
        JobStatus::Queued | JobStatus::Running => None,
    }
}

/// Sleep for the next backoff step. Returns `true` if shutdown was requested.
async fn pause(backoff: &mut Backoff, shutdown: &mut watch::Receiver<bool>) -> bool {
    let delay = backoff.next_delay();
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}

/// Exponential backoff: doubles from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Why a single job failed. Stored as the job's error message.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("Failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Backing-service failures that stop a job from being recorded.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
