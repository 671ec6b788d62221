use anyhow::{Context, Result};
use std::sync::Arc;
use stitch_customers::api::start_api_server;
use stitch_customers::{
    AppState, CompressionSettings, Config, CustomerService, ImageLifecycleManager, JpegCompressor,
    NotificationDispatcher, PgRecordStore, RecordStore, S3BlobStore, StorageUsageAggregator,
    WhatsAppClient,
};
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
        "Starting Stitch Customer Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let record_store = PgRecordStore::new(&config.database)
        .await
        .context("Failed to initialize record store")?;

    // Run migrations if enabled
    if config.database.run_migrations {
        record_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let records: Arc<dyn RecordStore> = Arc::new(record_store);
    let blobs = Arc::new(S3BlobStore::new(&config.s3).await);
    let compressor = Arc::new(JpegCompressor::new(CompressionSettings::from(&config.images)));
    let messaging = Arc::new(
        WhatsAppClient::new(&config.messaging).context("Failed to initialize messaging client")?,
    );

    let images = Arc::new(ImageLifecycleManager::new(
        records.clone(),
        blobs.clone(),
        compressor,
    ));

    // Create API state
    let api_state = AppState {
        records: records.clone(),
        customers: Arc::new(CustomerService::new(records.clone(), images.clone())),
        dispatcher: Arc::new(NotificationDispatcher::new(
            records.clone(),
            images.clone(),
            messaging,
        )),
        usage: Arc::new(StorageUsageAggregator::new(blobs, &config.usage)),
        images,
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Customer service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down customer service");

    api_handle.abort();

    info!("Customer service stopped");

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
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
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
            Ok(mut stream) => {
                stream.recv().await;
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
