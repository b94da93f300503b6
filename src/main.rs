mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use db::credits::PgCreditLedger;
use db::jobs::PgJobStore;
use services::analysis::VisionAiClient;
use services::generation::MeshyClient;
use services::lifecycle::{GenerationSettings, JobLifecycle};

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

    tracing::info!("Initializing figurine-forge server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("figurine_jobs_created", "Total figurine jobs created");
    metrics::describe_counter!(
        "figurine_generations_completed",
        "Total 3D generation attempts that completed"
    );
    metrics::describe_counter!(
        "figurine_generations_failed",
        "Total 3D generation attempts that failed"
    );
    metrics::describe_counter!(
        "figurine_credits_refunded",
        "Total credits refunded for failed or rejected attempts"
    );
    metrics::describe_histogram!(
        "figurine_generation_seconds",
        "Time from generation admission to a terminal provider state"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // External gateways
    tracing::info!("Initializing vision AI client");
    let analysis = VisionAiClient::new(
        &config.vision_base_url,
        &config.vision_api_key,
        &config.vision_model,
    );

    tracing::info!("Initializing Meshy image-to-3D client");
    let generation = MeshyClient::new(&config.meshy_base_url, &config.meshy_api_key);

    // Lifecycle controller with its persistence collaborators
    let lifecycle = JobLifecycle::new(
        PgJobStore::new(db_pool.clone()),
        PgCreditLedger::new(db_pool.clone()),
        analysis,
        generation,
        GenerationSettings {
            credits_cost: config.generation_cost,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            poll_max_attempts: config.poll_max_attempts,
        },
    );

    let state = AppState::new(db_pool, lifecycle);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/jobs", post(routes::jobs::create_job))
        .route("/api/v1/jobs/{job_id}", get(routes::jobs::get_job))
        .route("/api/v1/jobs/{job_id}/analyze", post(routes::jobs::analyze_job))
        .route("/api/v1/jobs/{job_id}/confirm", post(routes::jobs::confirm_job))
        .route("/api/v1/jobs/{job_id}/images", post(routes::jobs::attach_image))
        .route("/api/v1/jobs/{job_id}/generate", post(routes::jobs::generate_job))
        .route("/api/v1/jobs/{job_id}/cancel", post(routes::jobs::cancel_job))
        .route("/api/v1/jobs/{job_id}/reject", post(routes::jobs::reject_job))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit; images live in object storage

    tracing::info!("Starting figurine-forge on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
