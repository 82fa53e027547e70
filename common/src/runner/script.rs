// Dynamic script task handler

use crate::catalog::Catalog;
use crate::errors::TaskError;
use crate::models::Job;
use crate::runner::task::Task;
use crate::sandbox;
use async_trait::async_trait;
use std::sync::Arc;

/// Wraps a script source and its id. Each run instantiates a fresh
/// sandbox; any execution error propagates as handler error.
pub struct ScriptTask {
    id: String,
    source: String,
    catalog: Arc<dyn Catalog>,
}

impl ScriptTask {
    pub fn new(id: String, source: String, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            id,
            source,
            catalog,
        }
    }
}

#[async_trait]
impl Task for ScriptTask {
    async fn run(&self, job: &Job) -> Result<(), TaskError> {
        sandbox::execute(
            self.catalog.clone(),
            self.id.clone(),
            job.clone(),
            self.source.clone(),
        )
        .await?;
        Ok(())
    }
}
