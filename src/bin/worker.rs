use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use shadowban_monitor::{
    config::AppConfig,
    db,
    services::{
        http_client::BackoffHttpClient,
        processor::{DetectionApi, JobProcessor},
        scheduler::Scheduler,
        store::{PgAccountStore, PgJobStore},
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    tracing::info!("Starting shadowban check worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .expect("METRICS_ADDR must be a socket address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    telemetry::describe_metrics();

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize services
    let http = BackoffHttpClient::new().expect("Failed to build HTTP client");
    let processor = JobProcessor::new(
        Arc::new(PgJobStore::new(db_pool.clone(), config.max_attempts)),
        Arc::new(PgAccountStore::new(db_pool)),
        http,
        DetectionApi::new(
            config.detection_api_base_url.clone(),
            config.detection_api_key.clone(),
        ),
        config.fetch_config(),
    );
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(processor),
        config.scheduler_config(),
    ));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    tracing::info!(
        api = %config.detection_api_base_url,
        max_attempts = config.max_attempts,
        "Worker ready, starting scheduler"
    );

    scheduler.run(shutdown).await;

    tracing::info!("Worker stopped");
}
