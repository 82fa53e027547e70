// Property-based tests for the scheduler core

use async_trait::async_trait;
use common::catalog::{Catalog, MemoryCatalog};
use common::errors::QueueError;
use common::models::{Job, JOBS_TABLE};
use common::queue::JobPublisher;
use common::scheduler::SchedulerCore;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DB: &str = "worker_dev";

/// Publisher stand-in that records every firing payload.
struct RecordingPublisher {
    published: Mutex<Vec<Job>>,
}

impl RecordingPublisher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Vec::new()),
        })
    }

    fn take(&self) -> Vec<Job> {
        std::mem::take(&mut *self.published.lock().unwrap())
    }
}

#[async_trait]
impl JobPublisher for RecordingPublisher {
    async fn publish(&self, job: &Job) -> Result<(), QueueError> {
        self.published.lock().unwrap().push(job.clone());
        Ok(())
    }
}

fn job_doc(id: &str, when: &str, args: Value) -> Value {
    json!({
        "id": id,
        "when": when,
        "description": "",
        "name": "clear_expired_tokens",
        "args": args,
    })
}

/// One externally-driven catalog mutation.
#[derive(Debug, Clone)]
enum Op {
    Upsert { id: u8, valid_when: bool },
    Delete { id: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, any::<bool>()).prop_map(|(id, valid_when)| Op::Upsert { id, valid_when }),
        (0u8..6).prop_map(|id| Op::Delete { id }),
    ]
}

/// **Scheduler mirror.**
///
/// *For any* interleaving of create/update/delete events, once the
/// stream quiesces the admitted entry set equals the catalog rows whose
/// `when` parses.
#[test]
fn property_mapping_mirrors_catalog() {
    let config = ProptestConfig {
        cases: 24,
        ..ProptestConfig::default()
    };
    proptest!(config, |(ops in proptest::collection::vec(op_strategy(), 0..24))| {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let catalog = Arc::new(MemoryCatalog::new(DB));
            let mut core = SchedulerCore::new(catalog.clone(), RecordingPublisher::new());

            let driver = catalog.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                for op in ops {
                    match op {
                        Op::Upsert { id, valid_when } => {
                            let when = if valid_when { "@every 1h" } else { "gibberish" };
                            driver.upsert(
                                DB,
                                JOBS_TABLE,
                                job_doc(&format!("job-{id}"), when, json!({"db": "app"})),
                            );
                        }
                        Op::Delete { id } => {
                            driver.remove(DB, JOBS_TABLE, &format!("job-{id}"));
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                driver.close_watchers(JOBS_TABLE);
            });

            core.run().await.unwrap();

            let mut expected: Vec<String> = catalog
                .snapshot(JOBS_TABLE)
                .await
                .unwrap()
                .into_iter()
                .filter(|doc| doc["when"] == "@every 1h")
                .map(|doc| doc["id"].as_str().unwrap().to_string())
                .collect();
            expected.sort();

            assert_eq!(core.admitted_ids(), expected);
        });
    });
}

/// **Idempotent reconciliation.**
///
/// A no-op update (`old == new`) leaves the admitted set exactly where
/// it was.
#[tokio::test]
async fn test_noop_update_is_idempotent() {
    let catalog = Arc::new(MemoryCatalog::new(DB));
    let mut core = SchedulerCore::new(catalog.clone(), RecordingPublisher::new());

    let driver = catalog.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let doc = job_doc("j1", "@every 1h", json!({"db": "app"}));
        driver.upsert(DB, JOBS_TABLE, doc.clone());
        // Same document again: an {old = d, new = d} stream record.
        driver.upsert(DB, JOBS_TABLE, doc);
        tokio::time::sleep(Duration::from_millis(10)).await;
        driver.close_watchers(JOBS_TABLE);
    });

    core.run().await.unwrap();
    assert_eq!(core.admitted_ids(), vec!["j1".to_string()]);
}

/// **Firing faithfulness.**
///
/// The payload published for a firing equals the descriptor as of its
/// most recent admit: after an args update, subsequent firings carry
/// the new args and none carry the old ones.
#[tokio::test(flavor = "multi_thread")]
async fn test_firings_carry_latest_descriptor() {
    let catalog = Arc::new(MemoryCatalog::new(DB));
    let publisher = RecordingPublisher::new();
    let mut core = SchedulerCore::new(catalog.clone(), publisher.clone());

    let driver = catalog.clone();
    let recorder = publisher.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        driver.upsert(
            DB,
            JOBS_TABLE,
            job_doc("j1", "@every 20ms", json!({"db": "app"})),
        );
        tokio::time::sleep(Duration::from_millis(120)).await;

        driver.upsert(
            DB,
            JOBS_TABLE,
            job_doc("j1", "@every 20ms", json!({"db": "app2"})),
        );
        // Give the evict+admit a stream step, then observe a fresh
        // window of firings.
        tokio::time::sleep(Duration::from_millis(60)).await;
        recorder.take();
        tokio::time::sleep(Duration::from_millis(150)).await;

        driver.close_watchers(JOBS_TABLE);
    });

    core.run().await.unwrap();

    let window = publisher.take();
    assert!(!window.is_empty(), "expected firings after the update");
    for job in &window {
        assert_eq!(job.args, json!({"db": "app2"}));
        assert_eq!(job.id, "j1");
        assert_eq!(job.name, "clear_expired_tokens");
    }
}

/// **Deletion stops firings** within one stream step.
#[tokio::test(flavor = "multi_thread")]
async fn test_delete_stops_firings() {
    let catalog = Arc::new(MemoryCatalog::new(DB));
    let publisher = RecordingPublisher::new();
    let mut core = SchedulerCore::new(catalog.clone(), publisher.clone());

    let driver = catalog.clone();
    let recorder = publisher.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        driver.upsert(
            DB,
            JOBS_TABLE,
            job_doc("j1", "@every 20ms", json!({"db": "app"})),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        driver.remove(DB, JOBS_TABLE, "j1");
        tokio::time::sleep(Duration::from_millis(60)).await;
        recorder.take();
        tokio::time::sleep(Duration::from_millis(150)).await;

        driver.close_watchers(JOBS_TABLE);
    });

    core.run().await.unwrap();
    assert!(core.admitted_ids().is_empty());
    assert!(
        publisher.take().is_empty(),
        "no firings may follow a deletion"
    );
}

/// **Malformed `when` recovery.**
///
/// A creation with an unparseable expression is skipped; a later update
/// of the same descriptor with a valid expression admits it.
#[tokio::test]
async fn test_bad_when_then_good_update_admits() {
    let catalog = Arc::new(MemoryCatalog::new(DB));
    let mut core = SchedulerCore::new(catalog.clone(), RecordingPublisher::new());

    let driver = catalog.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        driver.upsert(DB, JOBS_TABLE, job_doc("j1", "once in a while", json!(null)));
        driver.upsert(DB, JOBS_TABLE, job_doc("j1", "@every 1h", json!(null)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        driver.close_watchers(JOBS_TABLE);
    });

    core.run().await.unwrap();
    assert_eq!(core.admitted_ids(), vec!["j1".to_string()]);
}

/// **Publish failure is fatal.**
///
/// A firing that cannot reach the bus takes the scheduler down instead
/// of silently dropping the firing.
#[tokio::test(flavor = "multi_thread")]
async fn test_publish_failure_is_fatal() {
    struct FailingPublisher;

    #[async_trait]
    impl JobPublisher for FailingPublisher {
        async fn publish(&self, _job: &Job) -> Result<(), QueueError> {
            Err(QueueError::PublishFailed("bus unreachable".to_string()))
        }
    }

    let catalog = Arc::new(MemoryCatalog::new(DB));
    catalog.upsert(
        DB,
        JOBS_TABLE,
        job_doc("j1", "@every 10ms", json!({"db": "app"})),
    );

    let mut core = SchedulerCore::new(catalog.clone(), Arc::new(FailingPublisher));
    let result = tokio::time::timeout(Duration::from_secs(5), core.run()).await;

    let run_outcome = result.expect("scheduler must terminate on publish failure");
    assert!(run_outcome.is_err());
}
