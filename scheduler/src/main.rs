// Scheduler binary entry point

use anyhow::Context;
use common::bootstrap;
use common::config::Settings;
use common::discovery::StaticDiscovery;
use common::queue::NatsJobPublisher;
use common::scheduler::SchedulerCore;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Unable to load configuration")?;
    settings.validate().map_err(anyhow::Error::msg)?;
    bootstrap::init_tracing(&settings.observability);

    info!("Starting the scheduler");

    let discovery = StaticDiscovery::from_config(&settings.discovery);
    let catalog = bootstrap::init_catalog(&settings, &discovery).await?;
    let queue = bootstrap::init_queue(&settings, &discovery).await?;
    let publisher = Arc::new(NatsJobPublisher::new(queue));

    let mut core = SchedulerCore::new(catalog, publisher);

    let shutdown = core.shutdown_trigger();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, initiating graceful shutdown");
            let _ = shutdown.send(());
        }
    });

    core.run().await?;

    info!("Scheduler stopped");
    Ok(())
}
