// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub catalog: CatalogConfig,
    pub discovery: DiscoveryConfig,
    pub queue: QueueConfig,
    pub runner: RunnerConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Database name the `jobs` and `scripts` tables live in.
    pub database: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database: "worker_dev".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Service name the catalog is registered under.
    pub catalog_service: String,
    /// Service name the bus is registered under.
    pub queue_service: String,
    /// Static registry: service name to candidate addresses.
    pub services: HashMap<String, Vec<String>>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            catalog_service: "catalog".to_string(),
            queue_service: "nats".to_string(),
            services: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// JetStream stream backing the job topic.
    pub stream_name: String,
    /// Subject job messages are published on.
    pub topic: String,
    /// Seconds to wait for a publish acknowledgment.
    pub publish_timeout_seconds: u64,
    /// Maximum age for messages in the stream (in seconds).
    pub max_age_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stream_name: "JOBS".to_string(),
            topic: "jobs".to_string(),
            publish_timeout_seconds: 5,
            max_age_seconds: 86400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Dispatcher concurrency; 0 means the ambient core count.
    pub concurrency: usize,
    /// Wall-clock timeout around each handler run.
    pub handler_timeout_seconds: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            handler_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log formatter type: `text` or `json`.
    pub log_format: LogFormat,
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            log_level: "debug".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            discovery: DiscoveryConfig::default(),
            queue: QueueConfig::default(),
            runner: RunnerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults -> file -> env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let defaults = Config::try_from(&Settings::default())?;

        let builder = Config::builder()
            .add_source(defaults)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.catalog.database.is_empty() {
            return Err("Catalog database name cannot be empty".to_string());
        }
        if self.queue.stream_name.is_empty() {
            return Err("Queue stream name cannot be empty".to_string());
        }
        if self.queue.topic.is_empty() {
            return Err("Queue topic cannot be empty".to_string());
        }
        if self.queue.publish_timeout_seconds == 0 {
            return Err("Publish timeout must be greater than 0".to_string());
        }
        if self.runner.handler_timeout_seconds == 0 {
            return Err("Handler timeout must be greater than 0".to_string());
        }
        if !self
            .discovery
            .services
            .contains_key(&self.discovery.catalog_service)
        {
            return Err(format!(
                "No discovery endpoints for catalog service '{}'",
                self.discovery.catalog_service
            ));
        }
        if !self
            .discovery
            .services
            .contains_key(&self.discovery.queue_service)
        {
            return Err(format!(
                "No discovery endpoints for queue service '{}'",
                self.discovery.queue_service
            ));
        }
        Ok(())
    }
}
