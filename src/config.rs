//! Service settings loaded from YAML

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::consumer::{ConsumerConfig, DeadLetterSettings, RetryPolicy};
use crate::error::ConfigError;
use crate::telemetry::LoggingSettings;
use crate::warehouse::BigQuerySettings;

/// Everything the binary needs to run
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Broker connection and batching
    pub kafka: ConsumerConfig,
    /// BigQuery tables and credentials
    pub warehouse: BigQuerySettings,
    /// Dead-letter destination
    pub dead_letter: DeadLetterSettings,
    /// Batch processing
    pub pipeline: PipelineSettings,
    /// Control HTTP surface
    pub service: ServiceSettings,
    /// Log output
    pub logging: LoggingSettings,
}

/// Batch processing settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Rows per warehouse submission
    pub chunk_size: usize,
    /// Consume as soon as the service is up
    pub start_running: bool,
    /// How long shutdown waits for in-flight batches
    pub shutdown_timeout_ms: u64,
    /// Warehouse retry policy
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: crate::consumer::processor::DEFAULT_CHUNK_SIZE,
            start_running: true,
            shutdown_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineSettings {
    /// Shutdown drain timeout
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Control HTTP surface settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Listen address
    pub bind_addr: String,
    /// Per-request timeout
    pub request_timeout_ms: u64,
    /// Concurrent request limit
    pub max_concurrent_requests: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            request_timeout_ms: 10_000,
            max_concurrent_requests: 64,
        }
    }
}

impl ServiceSettings {
    /// Parsed listen address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr.parse().map_err(|e| {
            ConfigError::Invalid(format!("service.bind_addr '{}': {}", self.bind_addr, e))
        })
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Settings {
    /// Read and validate a YAML settings file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate settings from YAML text
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kafka.validate().map_err(ConfigError::Invalid)?;
        self.warehouse.validate().map_err(ConfigError::Invalid)?;
        self.pipeline.retry.validate().map_err(ConfigError::Invalid)?;

        if self.pipeline.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.service.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "service.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        self.service.socket_addr()?;

        Ok(())
    }
}
