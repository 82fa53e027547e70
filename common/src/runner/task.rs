// Task handler contract

use crate::errors::TaskError;
use crate::models::Job;
use async_trait::async_trait;

/// A handler is anything that can run a job. Two kinds exist: compiled
/// built-ins and sandboxed dynamic scripts.
#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self, job: &Job) -> Result<(), TaskError>;
}
