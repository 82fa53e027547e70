// NATS JetStream client for the job topic

use crate::config::QueueConfig;
use crate::errors::QueueError;
use async_nats::jetstream::{
    consumer::PullConsumer,
    stream::{Config as StreamConfig, RetentionPolicy},
    Context as JetStreamContext,
};
use std::time::Duration;
use tracing::{info, instrument};

/// NATS JetStream client. One stream backs the job topic; the scheduler
/// publishes to it and each runner host consumes through its own
/// durable consumer.
#[derive(Clone)]
pub struct NatsClient {
    jetstream: JetStreamContext,
    config: QueueConfig,
}

impl NatsClient {
    /// Connect to a single bus address, so discovery can try the next
    /// candidate on failure.
    #[instrument(skip_all, fields(address = %address))]
    pub async fn connect(address: &str, config: QueueConfig) -> Result<Self, QueueError> {
        let url = if address.contains("://") {
            address.to_string()
        } else {
            format!("nats://{address}")
        };

        let client = async_nats::connect(url)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        info!("Connected to bus");

        let jetstream = async_nats::jetstream::new(client);
        Ok(Self { jetstream, config })
    }

    /// Create the job stream if it does not exist yet. Limits retention
    /// so every channel (durable consumer) observes each message.
    #[instrument(skip(self))]
    pub async fn ensure_stream(&self) -> Result<(), QueueError> {
        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![self.config.topic.clone()],
            retention: RetentionPolicy::Limits,
            max_age: Duration::from_secs(self.config.max_age_seconds),
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::StreamCreation(e.to_string()))?;

        info!(stream = %self.config.stream_name, "Stream ready");
        Ok(())
    }

    /// Create or look up the durable consumer for a channel. The runner
    /// passes its hostname, making the host the load-balancing unit.
    #[instrument(skip(self))]
    pub async fn channel_consumer(&self, channel: &str) -> Result<PullConsumer, QueueError> {
        let stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::ConsumerCreation(e.to_string()))?;

        let consumer_config = async_nats::jetstream::consumer::pull::Config {
            durable_name: Some(channel.to_string()),
            ack_policy: async_nats::jetstream::consumer::AckPolicy::Explicit,
            ack_wait: Duration::from_secs(60),
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(channel, consumer_config)
            .await
            .map_err(|e| QueueError::ConsumerCreation(e.to_string()))?;

        info!(channel, "Channel consumer ready");
        Ok(consumer)
    }

    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "JOBS");
        assert_eq!(config.topic, "jobs");
        assert_eq!(config.publish_timeout_seconds, 5);
    }
}
