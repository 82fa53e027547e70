// Runner core
//
// Mirrors the scheduler's reconciliation discipline on the `scripts`
// table: the task registry equals builtins plus the catalog's current
// script set, within one stream step. The bus consumer runs alongside
// and dispatches through the same registry.

use crate::catalog::{Catalog, Change};
use crate::models::{Interpreter, Script, SCRIPTS_TABLE};
use crate::queue::JobConsumer;
use crate::runner::registry::TaskRegistry;
use crate::runner::script::ScriptTask;
use anyhow::{anyhow, Context};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

pub struct RunnerCore {
    catalog: Arc<dyn Catalog>,
    registry: Arc<TaskRegistry>,
    consumer: Arc<dyn JobConsumer>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RunnerCore {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        registry: Arc<TaskRegistry>,
        consumer: Arc<dyn JobConsumer>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            catalog,
            registry,
            consumer,
            shutdown_tx,
        }
    }

    /// Handle for requesting graceful shutdown from another task.
    pub fn shutdown_trigger(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Install one script descriptor. Unknown interpreters and
    /// undecodable descriptors are logged and skipped; a collision with
    /// a built-in leaves the built-in authoritative.
    fn install(&self, value: &Value) {
        let script: Script = match serde_json::from_value(value.clone()) {
            Ok(script) => script,
            Err(e) => {
                warn!(error = %e, "Skipping malformed script descriptor");
                return;
            }
        };

        match script.interpreter {
            Interpreter::Js => {
                let task = ScriptTask::new(
                    script.id.clone(),
                    script.source,
                    self.catalog.clone(),
                );
                self.registry.install(&script.id, Arc::new(task));
            }
            Interpreter::Unknown => {
                warn!(script_id = %script.id, "Skipping script with unrecognized interpreter");
            }
        }
    }

    fn uninstall(&self, value: &Value) {
        let Some(id) = value.get("id").and_then(Value::as_str) else {
            warn!("Skipping script deletion with no id");
            return;
        };
        self.registry.uninstall(id);
    }

    fn apply(&self, change: Change) {
        match (change.old_val, change.new_val) {
            (None, Some(new)) => self.install(&new),
            (Some(old), None) => self.uninstall(&old),
            (Some(old), Some(new)) => {
                self.uninstall(&old);
                self.install(&new);
            }
            (None, None) => {}
        }
    }

    /// Run until the scripts change stream closes. The consumer runs
    /// concurrently; its failure is fatal because the runner would
    /// otherwise sit idle while looking healthy.
    #[instrument(skip(self))]
    pub async fn run(&self) -> anyhow::Result<()> {
        self.catalog
            .ensure_table(SCRIPTS_TABLE)
            .await
            .context("Unable to create the scripts table")?;

        let snapshot = self
            .catalog
            .snapshot(SCRIPTS_TABLE)
            .await
            .context("Unable to fetch scripts from the catalog")?;
        for descriptor in &snapshot {
            self.install(descriptor);
        }
        info!(tasks = self.registry.len(), "Loaded all scripts");

        let consumer = self.consumer.clone();
        let mut consumer_task = tokio::spawn(async move { consumer.start().await });

        let mut stream = self
            .catalog
            .watch(SCRIPTS_TABLE)
            .await
            .context("Unable to watch the scripts table")?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!("Watching the scripts table");

        let result = loop {
            tokio::select! {
                change = stream.next() => match change {
                    Some(Ok(change)) => self.apply(change),
                    Some(Err(e)) => {
                        break Err(anyhow!(e)).context("Change stream failed");
                    }
                    None => {
                        info!("Change stream closed");
                        break Ok(());
                    }
                },
                joined = &mut consumer_task => match joined {
                    Err(e) => break Err(anyhow!(e)).context("Consumer task panicked"),
                    Ok(Ok(())) => break Ok(()),
                    Ok(Err(e)) => break Err(anyhow!(e)).context("Consumer failed"),
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested");
                    break Ok(());
                }
            }
        };

        self.consumer.shutdown();
        if !consumer_task.is_finished() {
            let _ = consumer_task.await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::errors::QueueError;
    use crate::runner::builtin::CLEAR_EXPIRED_TOKENS;
    use crate::runner::task::Task;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::sync::Notify;

    /// Consumer stand-in that parks until shutdown.
    struct IdleConsumer {
        stop: Notify,
    }

    impl IdleConsumer {
        fn new() -> Arc<Self> {
            Arc::new(Self { stop: Notify::new() })
        }
    }

    #[async_trait]
    impl JobConsumer for IdleConsumer {
        async fn start(&self) -> Result<(), QueueError> {
            self.stop.notified().await;
            Ok(())
        }

        fn shutdown(&self) {
            self.stop.notify_waiters();
        }
    }

    struct Noop;

    #[async_trait]
    impl Task for Noop {
        async fn run(&self, _job: &crate::models::Job) -> Result<(), crate::errors::TaskError> {
            Ok(())
        }
    }

    fn core_over(catalog: Arc<MemoryCatalog>) -> RunnerCore {
        let mut builtins: HashMap<String, Arc<dyn Task>> = HashMap::new();
        builtins.insert(CLEAR_EXPIRED_TOKENS.to_string(), Arc::new(Noop));
        RunnerCore::new(
            catalog,
            Arc::new(TaskRegistry::with_builtins(builtins)),
            IdleConsumer::new(),
        )
    }

    fn script_doc(id: &str, interpreter: &str) -> Value {
        json!({"id": id, "interpreter": interpreter, "source": "1;"})
    }

    #[tokio::test]
    async fn test_snapshot_installs_scripts() {
        let catalog = Arc::new(MemoryCatalog::new("worker_dev"));
        catalog.upsert("worker_dev", SCRIPTS_TABLE, script_doc("sweep", "js"));
        catalog.upsert("worker_dev", SCRIPTS_TABLE, script_doc("gc", "js"));

        let core = core_over(catalog.clone());
        let closer = catalog.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            closer.close_watchers(SCRIPTS_TABLE);
        });
        core.run().await.unwrap();

        assert_eq!(
            core.registry().names(),
            vec![
                CLEAR_EXPIRED_TOKENS.to_string(),
                "gc".to_string(),
                "sweep".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_interpreter_is_skipped() {
        let catalog = Arc::new(MemoryCatalog::new("worker_dev"));
        catalog.upsert("worker_dev", SCRIPTS_TABLE, script_doc("lua-task", "lua"));

        let core = core_over(catalog.clone());
        let closer = catalog.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            closer.close_watchers(SCRIPTS_TABLE);
        });
        core.run().await.unwrap();

        assert!(core.registry().get("lua-task").is_none());
    }

    #[tokio::test]
    async fn test_builtin_collision_is_shadowed() {
        let catalog = Arc::new(MemoryCatalog::new("worker_dev"));
        catalog.upsert(
            "worker_dev",
            SCRIPTS_TABLE,
            script_doc(CLEAR_EXPIRED_TOKENS, "js"),
        );

        let core = core_over(catalog.clone());
        let closer = catalog.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            closer.close_watchers(SCRIPTS_TABLE);
        });
        core.run().await.unwrap();

        assert!(core.registry().is_builtin(CLEAR_EXPIRED_TOKENS));
        assert_eq!(core.registry().len(), 1);
    }
}
