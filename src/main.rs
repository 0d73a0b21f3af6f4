mod app_state;
mod config;
mod db;
mod models;
mod services;

use garde::Validate;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use app_state::AppContext;
use config::AppConfig;
use db::pg::PgJobStore;
use db::store::JobStore;
use services::{metrics, storage::ImageStorage, vlm::VlmClient};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting batch extraction worker");

    // Load and validate configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let worker_config = config.worker();
    worker_config
        .validate()
        .expect("Invalid worker configuration");

    metrics::describe_metrics();

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize services
    tracing::info!("Initializing services");
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool));

    let storage = Arc::new(
        ImageStorage::new(
            &config.s3_bucket,
            &config.s3_endpoint,
            &config.s3_access_key,
            &config.s3_secret_key,
        )
        .expect("Failed to initialize image storage"),
    );

    let vlm = Arc::new(VlmClient::new(
        &config.vlm_api_url,
        &config.vlm_api_token,
        &config.vlm_model,
    ));

    let context = AppContext::new(worker_config, store, storage, vlm);

    context.worker.start().expect("Failed to start worker");
    tracing::info!("Worker running, processing jobs");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");

    tracing::info!("Shutdown signal received, draining in-flight jobs");
    context.worker.stop().await;
    tracing::info!("Worker shut down cleanly");
}
