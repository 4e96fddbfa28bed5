use std::sync::Arc;

use axum::routing::get;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use ocr_job_queue::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::queue::{RedisWorkQueue, WorkQueue},
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

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing OCR job API");

    let prometheus_handle =
        routes::metrics::install_recorder().expect("Failed to install Prometheus metrics recorder");

    tracing::info!(prefix = %config.key_prefix, "Connecting to Redis job store");
    let store: Arc<dyn JobStore> = Arc::new(
        RedisJobStore::new(&config.redis_url, &config.key_prefix)
            .expect("Failed to initialize job store"),
    );
    // The API only pushes; the consumer id is never used for pops here.
    let queue: Arc<dyn WorkQueue> = Arc::new(
        RedisWorkQueue::new(&config.redis_url, &config.key_prefix, "api")
            .expect("Failed to initialize work queue"),
    );

    let state = AppState::new(store, queue, &config.default_model_id);

    let app = routes::router(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .expect("Server error");
}
