// Concurrent job consumer for the bus topic

use crate::errors::QueueError;
use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::AckKind;
use futures::future::BoxFuture;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, instrument, warn};

/// Consumer contract: run until shutdown, settle every message.
#[async_trait::async_trait]
pub trait JobConsumer: Send + Sync {
    /// Consume until shutdown is requested.
    async fn start(&self) -> Result<(), QueueError>;

    /// Request graceful shutdown.
    fn shutdown(&self);
}

/// Per-message completion verdict, decided by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge the message; it is done.
    Finish,
    /// Hand the message back to the bus with the default backoff.
    Requeue,
}

/// Dispatcher callback: raw message bytes in, completion verdict out.
/// Decoding is the dispatcher's business, not the consumer's.
pub type MessageHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Disposition> + Send + Sync>;

/// Pulls messages from a channel consumer and runs the handler with
/// bounded concurrency. Ack or nak follows the handler's verdict.
pub struct NatsJobConsumer {
    consumer: PullConsumer,
    handler: MessageHandler,
    concurrency: usize,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl NatsJobConsumer {
    pub fn new(consumer: PullConsumer, handler: MessageHandler, concurrency: usize) -> Self {
        Self {
            consumer,
            handler,
            concurrency: concurrency.max(1),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }
}

#[async_trait::async_trait]
impl JobConsumer for NatsJobConsumer {
    /// Consume until shutdown is requested. The message stream ending
    /// on its own is an error: the runner would silently stop taking
    /// work otherwise.
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), QueueError> {
        let mut messages = self
            .consumer
            .messages()
            .await
            .map_err(|e| QueueError::ConsumeFailed(e.to_string()))?;

        let permits = Arc::new(Semaphore::new(self.concurrency));
        info!(concurrency = self.concurrency, "Consumer started");

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            tokio::select! {
                message = messages.next() => {
                    match message {
                        Some(Ok(message)) => {
                            let permit = permits
                                .clone()
                                .acquire_owned()
                                .await
                                .expect("semaphore closed");
                            let handler = self.handler.clone();

                            tokio::spawn(async move {
                                let disposition =
                                    handler(message.payload.to_vec()).await;
                                let ack_result = match disposition {
                                    Disposition::Finish => message.ack().await,
                                    Disposition::Requeue => {
                                        message.ack_with(AckKind::Nak(None)).await
                                    }
                                };
                                if let Err(e) = ack_result {
                                    error!(error = %e, "Failed to settle message");
                                }
                                drop(permit);
                            });
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Error receiving message");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        None => {
                            if self.shutdown_flag.load(Ordering::Relaxed) {
                                break;
                            }
                            warn!("Message stream ended unexpectedly");
                            return Err(QueueError::ConsumeFailed(
                                "message stream ended".to_string(),
                            ));
                        }
                    }
                }
                _ = self.shutdown_notify.notified() => {
                    break;
                }
            }
        }

        // Drain: wait for all in-flight handlers to finish.
        let _ = permits.acquire_many(self.concurrency as u32).await;
        info!("Consumer stopped");
        Ok(())
    }

    /// Request graceful shutdown; `start` drains in-flight handlers and
    /// returns.
    fn shutdown(&self) {
        info!("Requesting consumer shutdown");
        self.shutdown_flag.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_waiters();
    }
}
