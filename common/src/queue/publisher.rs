// Job publisher for the bus topic

use crate::errors::QueueError;
use crate::models::Job;
use crate::queue::nats::NatsClient;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, instrument};

/// Publishes job messages onto the bus. The payload is the JSON form of
/// the Job descriptor, byte-for-byte what the runner decodes.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, job: &Job) -> Result<(), QueueError>;
}

pub struct NatsJobPublisher {
    client: NatsClient,
    publish_timeout: Duration,
}

impl NatsJobPublisher {
    pub fn new(client: NatsClient) -> Self {
        let publish_timeout = Duration::from_secs(client.config().publish_timeout_seconds);
        Self {
            client,
            publish_timeout,
        }
    }
}

#[async_trait]
impl JobPublisher for NatsJobPublisher {
    #[instrument(skip(self, job), fields(job_id = %job.id, job_name = %job.name))]
    async fn publish(&self, job: &Job) -> Result<(), QueueError> {
        let payload =
            serde_json::to_vec(job).map_err(|e| QueueError::SerializationFailed(e.to_string()))?;

        let topic = self.client.config().topic.clone();
        let ack = self
            .client
            .jetstream()
            .publish(topic, payload.into())
            .await
            .map_err(|e| QueueError::PublishFailed(e.to_string()))?;

        match tokio::time::timeout(self.publish_timeout, ack).await {
            Ok(Ok(_)) => {
                info!("Job published");
                Ok(())
            }
            Ok(Err(e)) => Err(QueueError::PublishFailed(e.to_string())),
            Err(_) => Err(QueueError::Timeout(format!(
                "no publish acknowledgment within {:?}",
                self.publish_timeout
            ))),
        }
    }
}
