//! Shared fakes and harnesses for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};

use ocr_job_queue::{
    app_state::AppState,
    models::{job::NormalizedInput, result::InferenceOutput},
    services::{
        admission::AdmissionController,
        callback::CallbackDispatcher,
        fetch::{decode_inline_image, FetchError, LocalResource, ResourceFetcher},
        ocr::{InferenceEngine, InferenceError},
        queue::{MemoryWorkQueue, WorkQueue},
        worker::{Worker, WorkerConfig},
    },
    store::{memory::MemoryJobStore, JobStore},
};

pub const MODEL_ID: &str = "paddleocr-vl";

/// Serves registered URL bodies; unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct FakeFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeFetcher {
    pub fn with(self, url: &str, body: &str) -> Self {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.as_bytes().to_vec());
        self
    }
}

#[async_trait]
impl ResourceFetcher for FakeFetcher {
    async fn fetch(&self, input: &NormalizedInput) -> Result<LocalResource, FetchError> {
        let bytes = match input {
            NormalizedInput::ResourceUrl(url) => self
                .bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| {
                    FetchError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        format!("connection refused: {url}"),
                    ))
                })?,
            NormalizedInput::InlineImage(data) => decode_inline_image(data)?,
        };
        LocalResource::from_bytes(&bytes)
    }
}

/// Echoes the document text back as OCR output. Documents starting with
/// `FAIL` raise an inference error; `SLOW` sleeps for a second first.
#[derive(Default)]
pub struct FakeEngine {
    pub calls: AtomicUsize,
}

#[async_trait]
impl InferenceEngine for FakeEngine {
    async fn run(&self, resource: &LocalResource) -> Result<InferenceOutput, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = tokio::fs::read_to_string(resource.path()).await?;
        if text.starts_with("FAIL") {
            return Err(InferenceError::Backend {
                status: 500,
                detail: "model crashed".to_string(),
            });
        }
        if text.starts_with("SLOW") {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(InferenceOutput::from_text(text))
    }
}

/// Everything wired against in-memory backends.
pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<MemoryWorkQueue>,
    pub engine: Arc<FakeEngine>,
    pub admission: AdmissionController,
    pub callbacks: Arc<CallbackDispatcher>,
    pub worker: Worker,
}

impl Harness {
    pub fn new(fetcher: FakeFetcher) -> Self {
        Self::with_config(fetcher, test_worker_config())
    }

    pub fn with_config(fetcher: FakeFetcher, config: WorkerConfig) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryWorkQueue::new());
        let engine = Arc::new(FakeEngine::default());
        let admission = AdmissionController::new(store.clone(), queue.clone(), MODEL_ID);
        let callbacks = Arc::new(
            CallbackDispatcher::new(
                store.clone(),
                Duration::from_secs(2),
                Duration::from_secs(3600),
            )
            .unwrap(),
        );
        let worker = Worker::new(
            "test-worker",
            store.clone(),
            queue.clone(),
            Arc::new(fetcher),
            engine.clone(),
            callbacks.clone(),
            config,
        );
        Self {
            store,
            queue,
            engine,
            admission,
            callbacks,
            worker,
        }
    }

    pub fn app_state(&self) -> AppState {
        let store: Arc<dyn JobStore> = self.store.clone();
        let queue: Arc<dyn WorkQueue> = self.queue.clone();
        AppState::new(store, queue, MODEL_ID)
    }
}

pub fn test_worker_config() -> WorkerConfig {
    WorkerConfig {
        dequeue_timeout: Duration::from_millis(50),
        backoff_initial: Duration::from_millis(10),
        backoff_max: Duration::from_millis(50),
        ..WorkerConfig::default()
    }
}

/// A request seen by the callback receiver.
#[derive(Debug, Clone)]
pub struct ReceivedCallback {
    pub body: serde_json::Value,
    pub headers: HeaderMap,
}

#[derive(Clone)]
struct ReceiverState {
    received: Arc<Mutex<Vec<ReceivedCallback>>>,
    respond_with: StatusCode,
}

/// Local HTTP endpoint that records every callback POST.
pub struct CallbackReceiver {
    pub url: String,
    received: Arc<Mutex<Vec<ReceivedCallback>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl CallbackReceiver {
    pub async fn spawn() -> Self {
        Self::spawn_with_status(StatusCode::OK).await
    }

    pub async fn spawn_with_status(respond_with: StatusCode) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = ReceiverState {
            received: received.clone(),
            respond_with,
        };
        let app = Router::new().route("/callback", post(record)).with_state(state);
        let (base_url, handle) = serve(app).await;
        Self {
            url: format!("{base_url}/callback"),
            received,
            handle,
        }
    }

    pub fn received(&self) -> Vec<ReceivedCallback> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for CallbackReceiver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn record(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    state
        .received
        .lock()
        .unwrap()
        .push(ReceivedCallback { body, headers });
    state.respond_with
}

/// The job API bound to an ephemeral port.
pub struct TestServer {
    pub base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn(state: AppState) -> Self {
        let (base_url, handle) = serve(ocr_job_queue::routes::router(state)).await;
        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), handle)
}

/// Poll `check` until it returns true or the timeout elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
