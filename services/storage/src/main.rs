use anyhow::{Context, Result};
use image_storage::api::{start_api_server, AppState};
use image_storage::config::Config;
use image_storage::image_id::SystemClock;
use image_storage::keys::StorageKeyCodec;
use image_storage::metadata_store::PgImageRecordStore;
use image_storage::object_store::S3ImageStore;
use image_storage::retention::RetentionSweeper;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        "Starting image storage service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let record_store = PgImageRecordStore::new(&config.database)
        .await
        .context("Failed to initialize image record store")?;

    // Run migrations if enabled
    if config.database.run_migrations {
        record_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let records = Arc::new(record_store);
    let objects = Arc::new(
        S3ImageStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 image store")?,
    );
    let clock = Arc::new(SystemClock);

    let api_state = AppState {
        records: records.clone(),
        objects: objects.clone(),
        codec: StorageKeyCodec::new(config.s3.bucket.clone()),
        clock: clock.clone(),
        upload_url_expiry: config.upload_url_expiry(),
        download_url_expiry: config.download_url_expiry(),
        default_ttl_days: config.images.default_ttl_days,
        max_page_size: config.images.max_page_size,
    };

    // Spawn retention sweeper task
    let sweeper_handle = if config.retention.enabled {
        let sweeper = RetentionSweeper::new(records, objects, clock, config.retention.clone());
        Some(tokio::spawn(async move { sweeper.run().await }))
    } else {
        info!("Retention sweeper disabled");
        None
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Image storage service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down image storage service");

    if let Some(handle) = sweeper_handle {
        handle.abort();
    }
    api_handle.abort();

    info!("Image storage service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
