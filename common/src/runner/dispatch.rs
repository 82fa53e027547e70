// Per-message dispatch policy
//
// Kept as a pure function over the registry so the ack/requeue rules
// are testable without a live bus. The consumer maps the returned
// disposition onto the bus client.

use crate::errors::TaskError;
use crate::models::Job;
use crate::queue::Disposition;
use crate::runner::registry::TaskRegistry;
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Decode a message, look up the handler and run it under the
/// wall-clock timeout.
///
/// - Undecodable payloads and handler failures requeue with the
///   default backoff and surface the error in the log.
/// - An unknown task name requeues without an error: the script may
///   simply not have reached this runner's registry yet.
/// - Success finishes the message.
#[instrument(skip_all)]
pub async fn dispatch(
    registry: &TaskRegistry,
    payload: &[u8],
    handler_timeout: Duration,
) -> Disposition {
    let job: Job = match serde_json::from_slice(payload) {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "Unable to decode a job message");
            return Disposition::Requeue;
        }
    };

    let Some(task) = registry.get(&job.name) else {
        debug!(job_id = %job.id, job_name = %job.name, "No handler for job, requeueing");
        return Disposition::Requeue;
    };

    let outcome = tokio::time::timeout(handler_timeout, task.run(&job)).await;
    match outcome {
        Ok(Ok(())) => {
            debug!(job_id = %job.id, job_name = %job.name, "Job finished");
            Disposition::Finish
        }
        Ok(Err(e)) => {
            error!(job_id = %job.id, job_name = %job.name, error = %e, "Job failed");
            Disposition::Requeue
        }
        Err(_) => {
            let e = TaskError::Timeout(handler_timeout.as_secs());
            error!(job_id = %job.id, job_name = %job.name, error = %e, "Job failed");
            Disposition::Requeue
        }
    }
}
