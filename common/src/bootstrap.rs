// Bootstrap utilities for binary initialization

use crate::catalog::{Catalog, MongoCatalog};
use crate::config::{LogFormat, ObservabilityConfig, Settings};
use crate::discovery::{discover, Discovery};
use crate::queue::NatsClient;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize tracing with the configured formatter.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

/// Resolve the catalog through discovery and connect. Fatal on
/// exhaustion: the cores cannot run without their source of truth.
pub async fn init_catalog(
    settings: &Settings,
    discovery: &dyn Discovery,
) -> Result<Arc<dyn Catalog>> {
    let database = settings.catalog.database.clone();
    let catalog = discover(discovery, &settings.discovery.catalog_service, |address| {
        let database = database.clone();
        async move { MongoCatalog::connect(&address, &database).await }
    })
    .await
    .context("Unable to connect to the catalog")?;

    info!(database = %settings.catalog.database, "Catalog initialized");
    Ok(Arc::new(catalog))
}

/// Resolve the bus through discovery, connect and ensure the job
/// stream exists.
pub async fn init_queue(settings: &Settings, discovery: &dyn Discovery) -> Result<NatsClient> {
    let config = settings.queue.clone();
    let client = discover(discovery, &settings.discovery.queue_service, |address| {
        let config = config.clone();
        async move { NatsClient::connect(&address, config).await }
    })
    .await
    .context("Unable to connect to the bus")?;

    client
        .ensure_stream()
        .await
        .context("Unable to initialize the job stream")?;

    info!(stream = %settings.queue.stream_name, "Queue initialized");
    Ok(client)
}
