//! Stale-job sweeper: cancels jobs stuck in `processing` past the staleness
//! threshold, refunding any consumed credits. Runs alongside the API server.

use std::time::Duration;

use figurine_forge::{
    config::AppConfig,
    db::{self, credits::PgCreditLedger, jobs::PgJobStore},
    services::{
        analysis::VisionAiClient,
        generation::MeshyClient,
        lifecycle::{GenerationSettings, JobLifecycle},
    },
};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const SWEEP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting figurine-forge stale-job sweeper");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    let lifecycle = JobLifecycle::new(
        PgJobStore::new(db_pool.clone()),
        PgCreditLedger::new(db_pool),
        VisionAiClient::new(
            &config.vision_base_url,
            &config.vision_api_key,
            &config.vision_model,
        ),
        MeshyClient::new(&config.meshy_base_url, &config.meshy_api_key),
        GenerationSettings {
            credits_cost: config.generation_cost,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            poll_max_attempts: config.poll_max_attempts,
        },
    );

    let threshold = chrono::Duration::minutes(config.stale_after_minutes);

    tracing::info!(
        stale_after_minutes = config.stale_after_minutes,
        "Sweeper ready, starting sweep loop"
    );

    loop {
        match lifecycle.sweep_stale(threshold).await {
            Ok(0) => {
                tracing::trace!("No stale jobs");
            }
            Ok(cancelled) => {
                tracing::info!(cancelled, "Cancelled stale jobs");
            }
            Err(e) => {
                tracing::error!(error = %e, "Sweep failed, will retry");
            }
        }

        sleep(Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
    }
}
