use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and describe the service metrics.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!("ocr_jobs_admitted", "Jobs accepted by admission");
    metrics::describe_counter!("ocr_jobs_finished", "Jobs that reached the finished state");
    metrics::describe_counter!("ocr_jobs_failed", "Jobs that reached the failed state");
    metrics::describe_counter!("ocr_callbacks_failed", "Callback deliveries that failed");
    metrics::describe_histogram!(
        "ocr_job_processing_seconds",
        "Time from claiming a job to its terminal state"
    );
    metrics::describe_gauge!("ocr_queue_depth", "Pending items in the work queue");

    Ok(Arc::new(handle))
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
