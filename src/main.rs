use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use scan_orchestrator::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        controller::{NoopObserver, ScanController},
        pipeline::ItemPipelines,
        worker_client::WorkerClient,
    },
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

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(worker = %config.worker_base_url, "Initializing scan-orchestrator");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("scan_jobs_started_total", "Scan-all jobs started");
    metrics::describe_counter!(
        "scan_jobs_finished_total",
        "Scan-all jobs that reached a terminal phase, by outcome"
    );
    metrics::describe_counter!(
        "scan_poll_failures_total",
        "Status polls that failed to reach the worker"
    );
    metrics::describe_histogram!(
        "scan_job_duration_seconds",
        "Time from scan-all start to terminal phase"
    );
    metrics::describe_counter!(
        "item_pipelines_total",
        "Item upload pipelines that finished, by outcome"
    );
    metrics::describe_gauge!("item_pipelines_active", "Item upload pipelines in flight");

    // Initialize worker client
    let worker = WorkerClient::new(
        &config.worker_base_url,
        config.worker_api_token.clone(),
        config.request_timeout(),
    )
    .expect("Failed to initialize worker client");
    let worker = Arc::new(worker);

    let scan = ScanController::new(
        worker.clone(),
        Arc::new(NoopObserver),
        config.controller_settings(),
    );
    let items = ItemPipelines::new(worker.clone(), config.pipeline_settings());

    let state = AppState::new(worker, scan, items);

    let app = routes::api_router(state, config.max_upload_bytes)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes + 64 * 1024));

    tracing::info!("Starting scan-orchestrator on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
