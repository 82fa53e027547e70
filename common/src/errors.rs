// Error handling framework

use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid time expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
}

/// Catalog errors. A failed change-stream read means the in-memory
/// projection can no longer be trusted, so the cores treat it as fatal.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to connect to catalog: {0}")]
    Connection(String),

    #[error("Failed to create table: {0}")]
    TableCreation(String),

    #[error("Failed to read from catalog: {0}")]
    ReadFailed(String),

    #[error("Failed to write to catalog: {0}")]
    WriteFailed(String),

    #[error("Change stream failed: {0}")]
    StreamFailed(String),
}

/// Queue-related errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Failed to create consumer: {0}")]
    ConsumerCreation(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Failed to consume message: {0}")]
    ConsumeFailed(String),

    #[error("Message serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Queue operation timeout: {0}")]
    Timeout(String),
}

/// Discovery errors. Resolution failure at startup is fatal to the
/// process.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Service not registered: {0}")]
    UnknownService(String),

    #[error("No reachable candidate for service '{service}': {reason}")]
    Exhausted { service: String, reason: String },
}

/// Task handler errors. These are reported back to the bus, which
/// requeues the message; they never take the runner down.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Invalid args: {0}")]
    InvalidArgs(String),

    #[error("Catalog operation failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Script execution failed: {0}")]
    Script(#[from] SandboxError),

    #[error("Handler timed out after {0} seconds")]
    Timeout(u64),
}

/// Script sandbox errors
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Script evaluation failed: {0}")]
    Evaluation(String),

    #[error("Failed to inject '{name}': {reason}")]
    Injection { name: String, reason: String },

    #[error("Sandbox thread panicked")]
    Panicked,
}
