use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use ocr_job_queue::{
    config::AppConfig,
    routes,
    services::{
        callback::CallbackDispatcher,
        fetch::{HttpResourceFetcher, ResourceFetcher},
        ocr::{InferenceEngine, OcrServiceClient},
        queue::RedisWorkQueue,
        worker::Worker,
    },
    store::{redis_store::RedisJobStore, JobStore},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting OCR worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Recorder only; the worker exposes no scrape endpoint of its own.
    let _metrics = routes::metrics::install_recorder().expect("Failed to install metrics recorder");

    tracing::info!("Initializing services");
    let store: Arc<dyn JobStore> = Arc::new(
        RedisJobStore::new(&config.redis_url, &config.key_prefix)
            .expect("Failed to initialize job store"),
    );
    let fetcher: Arc<dyn ResourceFetcher> = Arc::new(
        HttpResourceFetcher::new(config.fetch_timeout(), config.max_download_bytes)
            .expect("Failed to initialize resource fetcher"),
    );
    let engine: Arc<dyn InferenceEngine> = Arc::new(
        OcrServiceClient::new(&config.ocr_service_url).expect("Failed to initialize OCR client"),
    );
    let callbacks = Arc::new(
        CallbackDispatcher::new(
            store.clone(),
            config.callback_timeout(),
            config.callback_dedup_ttl(),
        )
        .expect("Failed to initialize callback dispatcher"),
    );

    let consumer_ids = config
        .consumer_ids()
        .expect("WORKER_ID must be set to an id unique to this worker process");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    for consumer_id in consumer_ids {
        let queue = Arc::new(
            RedisWorkQueue::new(&config.redis_url, &config.key_prefix, &consumer_id)
                .expect("Failed to initialize work queue"),
        );
        let worker = Worker::new(
            consumer_id,
            store.clone(),
            queue,
            fetcher.clone(),
            engine.clone(),
            callbacks.clone(),
            config.worker_config(),
        );
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { worker.run(shutdown).await }));
    }

    tracing::info!(
        worker_id = config.worker_id.as_deref().unwrap_or_default(),
        concurrency = handles.len(),
        "Worker ready, starting job processing loops"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested, waiting for in-flight jobs");
    shutdown_tx.send(true).ok();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }
    tracing::info!("Worker shut down");
}
