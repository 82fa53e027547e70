// Catalog client: document store handle plus change-stream subscription
//
// The catalog is the single source of truth for both cores; in-memory
// state is a projection kept consistent with it through `watch`.

pub mod condition;
pub mod memory;
pub mod mongo;

pub use condition::{Condition, Operand, Predicate};
pub use memory::MemoryCatalog;
pub use mongo::MongoCatalog;

use crate::errors::CatalogError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

/// One change-stream record. Both sides may be absent, never both:
/// creation has no `old_val`, deletion has no `new_val`.
#[derive(Debug, Clone)]
pub struct Change {
    pub old_val: Option<Value>,
    pub new_val: Option<Value>,
}

/// Server-pushed sequence of catalog mutations.
pub type ChangeStream = BoxStream<'static, Result<Change, CatalogError>>;

/// Document store handle. `ensure_table`, `snapshot` and `watch` operate
/// on the configured default database; the mutation operations take an
/// explicit database name because scripts address arbitrary databases.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Best-effort table creation; "already exists" is not an error.
    async fn ensure_table(&self, table: &str) -> Result<(), CatalogError>;

    /// Read every row of a table.
    async fn snapshot(&self, table: &str) -> Result<Vec<Value>, CatalogError>;

    /// Open a change stream over a table. The stream ends when the
    /// subscription closes; an `Err` item means the projection built on
    /// top of it is no longer trustworthy.
    async fn watch(&self, table: &str) -> Result<ChangeStream, CatalogError>;

    async fn insert(&self, db: &str, table: &str, record: Value) -> Result<(), CatalogError>;

    /// Apply `change` to every row matching `condition`; returns the
    /// number of rows modified.
    async fn update_where(
        &self,
        db: &str,
        table: &str,
        condition: &Condition,
        change: Value,
    ) -> Result<u64, CatalogError>;

    /// Delete every row matching `condition`; returns the number of
    /// rows removed.
    async fn delete_where(
        &self,
        db: &str,
        table: &str,
        condition: &Condition,
    ) -> Result<u64, CatalogError>;

    /// Read every row matching `condition`.
    async fn find_where(
        &self,
        db: &str,
        table: &str,
        condition: &Condition,
    ) -> Result<Vec<Value>, CatalogError>;
}
