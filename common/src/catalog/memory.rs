// In-memory catalog backend
//
// Backs the test suites and local development. Contract-equivalent to
// the MongoDB backend: same snapshot/watch semantics, same condition
// evaluation (shared through `Condition`).

use crate::catalog::condition::Condition;
use crate::catalog::{Catalog, Change, ChangeStream};
use crate::errors::CatalogError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Default)]
struct Inner {
    /// `db/table` -> id -> document.
    tables: HashMap<String, BTreeMap<String, Value>>,
    /// Live watchers per `db/table`; closed receivers are pruned on emit.
    watchers: HashMap<String, Vec<mpsc::UnboundedSender<Change>>>,
}

pub struct MemoryCatalog {
    default_db: String,
    inner: Mutex<Inner>,
    id_counter: AtomicU64,
}

impl MemoryCatalog {
    pub fn new(default_db: impl Into<String>) -> Self {
        Self {
            default_db: default_db.into(),
            inner: Mutex::new(Inner::default()),
            id_counter: AtomicU64::new(1),
        }
    }

    fn key(&self, db: &str, table: &str) -> String {
        format!("{db}/{table}")
    }

    /// Close every watcher of a default-database table, ending their
    /// change streams. Tests use this to let a reconciliation loop quiesce.
    pub fn close_watchers(&self, table: &str) {
        let key = self.key(&self.default_db, table);
        let mut inner = self.inner.lock().expect("catalog lock poisoned");
        inner.watchers.remove(&key);
    }

    /// Row count of an arbitrary table, for test assertions.
    pub fn len(&self, db: &str, table: &str) -> usize {
        let key = self.key(db, table);
        let inner = self.inner.lock().expect("catalog lock poisoned");
        inner.tables.get(&key).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, db: &str, table: &str) -> bool {
        self.len(db, table) == 0
    }

    fn emit(inner: &mut Inner, key: &str, change: Change) {
        if let Some(watchers) = inner.watchers.get_mut(key) {
            watchers.retain(|tx| tx.send(change.clone()).is_ok());
        }
    }

    fn doc_id(&self, record: &Value) -> String {
        record
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!("gen-{}", self.id_counter.fetch_add(1, Ordering::Relaxed))
            })
    }

    /// Upsert a document by its `id` field, emitting the corresponding
    /// change record. This is the write path the reconciliation tests
    /// drive.
    pub fn upsert(&self, db: &str, table: &str, record: Value) {
        let key = self.key(db, table);
        let id = self.doc_id(&record);
        let mut inner = self.inner.lock().expect("catalog lock poisoned");
        let old = inner
            .tables
            .entry(key.clone())
            .or_default()
            .insert(id, record.clone());
        Self::emit(
            &mut inner,
            &key,
            Change {
                old_val: old,
                new_val: Some(record),
            },
        );
    }

    /// Delete a document by id, emitting the change record. Missing ids
    /// are a no-op.
    pub fn remove(&self, db: &str, table: &str, id: &str) {
        let key = self.key(db, table);
        let mut inner = self.inner.lock().expect("catalog lock poisoned");
        let old = inner
            .tables
            .get_mut(&key)
            .and_then(|table| table.remove(id));
        if let Some(old) = old {
            Self::emit(
                &mut inner,
                &key,
                Change {
                    old_val: Some(old),
                    new_val: None,
                },
            );
        }
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn ensure_table(&self, table: &str) -> Result<(), CatalogError> {
        let key = self.key(&self.default_db, table);
        let mut inner = self.inner.lock().expect("catalog lock poisoned");
        inner.tables.entry(key).or_default();
        Ok(())
    }

    async fn snapshot(&self, table: &str) -> Result<Vec<Value>, CatalogError> {
        let key = self.key(&self.default_db, table);
        let inner = self.inner.lock().expect("catalog lock poisoned");
        Ok(inner
            .tables
            .get(&key)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn watch(&self, table: &str) -> Result<ChangeStream, CatalogError> {
        let key = self.key(&self.default_db, table);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock().expect("catalog lock poisoned");
            inner.watchers.entry(key).or_default().push(tx);
        }
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|change| (Ok(change), rx))
        });
        Ok(Box::pin(stream))
    }

    async fn insert(&self, db: &str, table: &str, record: Value) -> Result<(), CatalogError> {
        self.upsert(db, table, record);
        Ok(())
    }

    async fn update_where(
        &self,
        db: &str,
        table: &str,
        condition: &Condition,
        change: Value,
    ) -> Result<u64, CatalogError> {
        let patch = change
            .as_object()
            .ok_or_else(|| CatalogError::WriteFailed("change must be an object".to_string()))?
            .clone();
        let key = self.key(db, table);
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("catalog lock poisoned");

        let mut updates = Vec::new();
        if let Some(rows) = inner.tables.get_mut(&key) {
            for (id, doc) in rows.iter_mut() {
                if !condition.matches(doc, now) {
                    continue;
                }
                let old = doc.clone();
                if let Some(map) = doc.as_object_mut() {
                    for (field, value) in &patch {
                        map.insert(field.clone(), value.clone());
                    }
                }
                updates.push((id.clone(), old, doc.clone()));
            }
        }

        let count = updates.len() as u64;
        for (_, old, new) in updates {
            Self::emit(
                &mut inner,
                &key,
                Change {
                    old_val: Some(old),
                    new_val: Some(new),
                },
            );
        }
        Ok(count)
    }

    async fn delete_where(
        &self,
        db: &str,
        table: &str,
        condition: &Condition,
    ) -> Result<u64, CatalogError> {
        let key = self.key(db, table);
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("catalog lock poisoned");

        let mut removed = Vec::new();
        if let Some(rows) = inner.tables.get_mut(&key) {
            let doomed: Vec<String> = rows
                .iter()
                .filter(|(_, doc)| condition.matches(doc, now))
                .map(|(id, _)| id.clone())
                .collect();
            for id in doomed {
                if let Some(doc) = rows.remove(&id) {
                    removed.push(doc);
                }
            }
        }

        let count = removed.len() as u64;
        for doc in removed {
            Self::emit(
                &mut inner,
                &key,
                Change {
                    old_val: Some(doc),
                    new_val: None,
                },
            );
        }
        Ok(count)
    }

    async fn find_where(
        &self,
        db: &str,
        table: &str,
        condition: &Condition,
    ) -> Result<Vec<Value>, CatalogError> {
        let key = self.key(db, table);
        let now = Utc::now();
        let inner = self.inner.lock().expect("catalog lock poisoned");
        Ok(inner
            .tables
            .get(&key)
            .map(|rows| {
                rows.values()
                    .filter(|doc| condition.matches(doc, now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
