// Queue module: the message bus between scheduler and runner

pub mod consumer;
pub mod nats;
pub mod publisher;

pub use consumer::{Disposition, JobConsumer, MessageHandler, NatsJobConsumer};
pub use nats::NatsClient;
pub use publisher::{JobPublisher, NatsJobPublisher};
