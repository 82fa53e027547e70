// Built-in task handlers

use crate::catalog::{Catalog, Condition, Operand, Predicate};
use crate::errors::TaskError;
use crate::models::Job;
use crate::runner::task::Task;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub const CLEAR_EXPIRED_TOKENS: &str = "clear_expired_tokens";

/// The full built-in handler set, keyed by dispatch name.
pub fn builtin_tasks(catalog: Arc<dyn Catalog>) -> HashMap<String, Arc<dyn Task>> {
    let mut tasks: HashMap<String, Arc<dyn Task>> = HashMap::new();
    tasks.insert(
        CLEAR_EXPIRED_TOKENS.to_string(),
        Arc::new(ClearExpiredTokens::new(catalog)),
    );
    tasks
}

/// Deletes every row of `{db}.tokens` whose `expiry_date` has passed.
/// `db` comes from the job args.
pub struct ClearExpiredTokens {
    catalog: Arc<dyn Catalog>,
}

impl ClearExpiredTokens {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Task for ClearExpiredTokens {
    async fn run(&self, job: &Job) -> Result<(), TaskError> {
        let db = job
            .args
            .get("db")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::InvalidArgs("args.db must be a string".to_string()))?;

        let expired = Condition::new().with("expiry_date", Predicate::Le(Operand::Now));
        let deleted = self.catalog.delete_where(db, "tokens", &expired).await?;

        info!(job_id = %job.id, db, deleted, "Cleared expired tokens");
        Ok(())
    }
}
