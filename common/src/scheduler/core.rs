// Scheduler core
//
// Snapshot-then-stream reconciliation over the `jobs` table. The entry
// set of the cron engine is at all times the set implied by the current
// catalog state: admit on create, evict on delete, evict-then-admit on
// update so firings always carry the latest descriptor snapshot.

use crate::catalog::{Catalog, Change};
use crate::errors::QueueError;
use crate::models::{Job, JOBS_TABLE};
use crate::queue::JobPublisher;
use crate::schedule::TimeExpr;
use crate::scheduler::engine::{CronEngine, EntryId, FireAction};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, warn};

/// Firing action for one admitted entry. Serializes the descriptor
/// snapshot captured at admit time; a publish failure is routed to the
/// core's fatal channel because a silently missed firing would break
/// the scheduler's contract.
struct PublishJob {
    job: Job,
    publisher: Arc<dyn JobPublisher>,
    fatal: mpsc::UnboundedSender<QueueError>,
}

#[async_trait]
impl FireAction for PublishJob {
    async fn fire(&self) {
        debug!(job_id = %self.job.id, job_name = %self.job.name, "Entry fired");
        if let Err(e) = self.publisher.publish(&self.job).await {
            error!(
                job_id = %self.job.id,
                job_name = %self.job.name,
                error = %e,
                "Unable to queue a job firing"
            );
            let _ = self.fatal.send(e);
        }
    }
}

pub struct SchedulerCore {
    catalog: Arc<dyn Catalog>,
    publisher: Arc<dyn JobPublisher>,
    engine: CronEngine,
    /// Exactly the admitted subset of the catalog, minus observed
    /// deletions. Owned by the reconciliation loop; nothing else
    /// mutates it.
    mapping: HashMap<String, EntryId>,
    fatal_tx: mpsc::UnboundedSender<QueueError>,
    fatal_rx: Option<mpsc::UnboundedReceiver<QueueError>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SchedulerCore {
    pub fn new(catalog: Arc<dyn Catalog>, publisher: Arc<dyn JobPublisher>) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            catalog,
            publisher,
            engine: CronEngine::new(),
            mapping: HashMap::new(),
            fatal_tx,
            fatal_rx: Some(fatal_rx),
            shutdown_tx,
        }
    }

    /// Handle for requesting graceful shutdown from another task.
    pub fn shutdown_trigger(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Ids currently admitted, for observation in tests.
    pub fn admitted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.mapping.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Admit one descriptor: parse its `when`, register a trigger whose
    /// action publishes the captured snapshot. A parse or decode
    /// failure is per-entry: logged, skipped, never poisons the loop.
    fn admit(&mut self, value: &Value) {
        let job: Job = match serde_json::from_value(value.clone()) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Skipping malformed job descriptor");
                return;
            }
        };

        let expr = match TimeExpr::parse(&job.when) {
            Ok(expr) => expr,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Skipping job with invalid time expression");
                return;
            }
        };

        let id = job.id.clone();
        let action = Arc::new(PublishJob {
            job,
            publisher: self.publisher.clone(),
            fatal: self.fatal_tx.clone(),
        });
        let entry = self.engine.add(expr, action);

        debug!(job_id = %id, "Job admitted");
        self.mapping.insert(id, entry);
    }

    /// Evict by descriptor id. Missing entries are tolerated; they
    /// indicate a prior admit that failed.
    fn evict(&mut self, value: &Value) {
        let Some(id) = value.get("id").and_then(Value::as_str) else {
            warn!("Skipping deletion with no id");
            return;
        };
        if let Some(entry) = self.mapping.remove(id) {
            self.engine.remove(entry);
            debug!(job_id = %id, "Job evicted");
        }
    }

    fn apply(&mut self, change: Change) {
        match (change.old_val, change.new_val) {
            (None, Some(new)) => self.admit(&new),
            (Some(old), None) => self.evict(&old),
            (Some(old), Some(new)) => {
                self.evict(&old);
                self.admit(&new);
            }
            (None, None) => {}
        }
    }

    /// Run until the change stream closes. Bootstrap admits the full
    /// snapshot before the engine starts, so nothing fires against a
    /// half-built entry set.
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut fatal_rx = self
            .fatal_rx
            .take()
            .ok_or_else(|| anyhow!("scheduler core already running"))?;

        self.catalog
            .ensure_table(JOBS_TABLE)
            .await
            .context("Unable to create the jobs table")?;

        let snapshot = self
            .catalog
            .snapshot(JOBS_TABLE)
            .await
            .context("Unable to fetch jobs from the catalog")?;
        for descriptor in &snapshot {
            self.admit(descriptor);
        }
        info!(entries = self.mapping.len(), "Bootstrap reconciliation complete");

        self.engine.start();
        info!("Cron engine started");

        let mut stream = self
            .catalog
            .watch(JOBS_TABLE)
            .await
            .context("Unable to watch the jobs table")?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!("Watching the jobs table");

        loop {
            tokio::select! {
                change = stream.next() => match change {
                    Some(Ok(change)) => self.apply(change),
                    Some(Err(e)) => {
                        return Err(anyhow!(e)).context("Change stream failed");
                    }
                    None => {
                        info!("Change stream closed");
                        break;
                    }
                },
                failure = fatal_rx.recv() => {
                    let e = failure.expect("fatal channel closed while core holds a sender");
                    return Err(anyhow!(e)).context("Publish failure during a firing");
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingPublisher {
        published: Mutex<Vec<Job>>,
    }

    impl RecordingPublisher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                published: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl JobPublisher for RecordingPublisher {
        async fn publish(&self, job: &Job) -> Result<(), QueueError> {
            self.published.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    fn job_doc(id: &str, when: &str) -> Value {
        json!({
            "id": id,
            "when": when,
            "description": "",
            "name": "noop",
            "args": null,
        })
    }

    #[tokio::test]
    async fn test_bootstrap_admits_snapshot() {
        let catalog = Arc::new(MemoryCatalog::new("worker_dev"));
        catalog.upsert("worker_dev", JOBS_TABLE, job_doc("a", "@every 1h"));
        catalog.upsert("worker_dev", JOBS_TABLE, job_doc("b", "0 0 12 * * *"));

        let mut core = SchedulerCore::new(catalog.clone(), RecordingPublisher::new());
        let closer = catalog.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            closer.close_watchers(JOBS_TABLE);
        });
        core.run().await.unwrap();

        assert_eq!(core.admitted_ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_when_is_skipped() {
        let catalog = Arc::new(MemoryCatalog::new("worker_dev"));
        catalog.upsert("worker_dev", JOBS_TABLE, job_doc("bad", "never o'clock"));

        let mut core = SchedulerCore::new(catalog.clone(), RecordingPublisher::new());
        let closer = catalog.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            closer.close_watchers(JOBS_TABLE);
        });
        core.run().await.unwrap();

        assert!(core.admitted_ids().is_empty());
    }

    #[tokio::test]
    async fn test_run_twice_is_an_error() {
        let catalog = Arc::new(MemoryCatalog::new("worker_dev"));
        let mut core = SchedulerCore::new(catalog.clone(), RecordingPublisher::new());
        let closer = catalog.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            closer.close_watchers(JOBS_TABLE);
        });
        core.run().await.unwrap();
        assert!(core.run().await.is_err());
    }
}
