// Runner binary entry point

use anyhow::Context;
use common::bootstrap;
use common::config::Settings;
use common::discovery::StaticDiscovery;
use common::queue::{MessageHandler, NatsJobConsumer};
use common::runner::{builtin_tasks, dispatch, RunnerCore, TaskRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Unable to load configuration")?;
    settings.validate().map_err(anyhow::Error::msg)?;
    bootstrap::init_tracing(&settings.observability);

    info!("Starting the runner");

    let discovery = StaticDiscovery::from_config(&settings.discovery);
    let catalog = bootstrap::init_catalog(&settings, &discovery).await?;
    let queue = bootstrap::init_queue(&settings, &discovery).await?;

    // Each physical host forms one load-balancing group: the channel
    // name is the hostname.
    let channel = gethostname::gethostname()
        .to_string_lossy()
        .replace(['.', '*', '>', ' '], "-");

    let concurrency = match settings.runner.concurrency {
        0 => std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1),
        n => n,
    };

    let registry = Arc::new(TaskRegistry::with_builtins(builtin_tasks(catalog.clone())));

    let handler_timeout = Duration::from_secs(settings.runner.handler_timeout_seconds);
    let handler_registry = registry.clone();
    let handler: MessageHandler = Arc::new(move |payload: Vec<u8>| {
        let registry = handler_registry.clone();
        Box::pin(async move { dispatch(&registry, &payload, handler_timeout).await })
    });

    let pull_consumer = queue
        .channel_consumer(&channel)
        .await
        .context("Unable to create the channel consumer")?;
    let consumer = Arc::new(NatsJobConsumer::new(pull_consumer, handler, concurrency));

    info!(channel = %channel, concurrency, "Consumer configured");

    let core = RunnerCore::new(catalog, registry, consumer);

    let shutdown = core.shutdown_trigger();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating graceful shutdown");
            let _ = shutdown.send(());
        }
    });

    core.run().await?;

    info!("Runner stopped");
    Ok(())
}
