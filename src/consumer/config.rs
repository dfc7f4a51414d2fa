//! Consumer configuration structures

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::error::{ConsumerError, ConsumerResult};

/// Environment variable consulted when no SASL password is configured
pub const PASSWORD_ENV: &str = "KAFKA_PASSWORD";

/// librdkafka properties that may be passed through `kafka_properties`
pub const ALLOWED_KAFKA_PROPS: &[&str] = &[
    // Fetch settings
    "fetch.min.bytes",
    "fetch.wait.max.ms",
    "fetch.max.bytes",
    "max.partition.fetch.bytes",
    // Request settings
    "request.timeout.ms",
    "metadata.max.age.ms",
    "socket.receive.buffer.bytes",
    "socket.send.buffer.bytes",
    // Consumer settings
    "queued.min.messages",
    "queued.max.messages.kbytes",
    "fetch.error.backoff.ms",
    "fetch.message.max.bytes",
    "client.id",
    "partition.assignment.strategy",
    // Connection settings
    "reconnect.backoff.ms",
    "reconnect.backoff.max.ms",
    "connections.max.idle.ms",
    "socket.keepalive.enable",
    "ssl.ca.location",
    // Monitoring
    "statistics.interval.ms",
];

/// Kafka consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Kafka broker addresses (comma-separated)
    pub brokers: String,

    /// Consumer group ID
    pub group_id: String,

    /// Topics to consume from
    pub topics: Vec<String>,

    /// Number of workers, each with its own consumer in the group
    pub concurrency: usize,

    /// Upper bound on messages per batch
    pub max_poll_records: usize,

    /// How long a worker waits for the first message of a batch
    pub poll_timeout_ms: u64,

    /// How long a worker keeps filling a batch after its first message
    pub batch_linger_ms: u64,

    /// Session timeout in milliseconds
    pub session_timeout_ms: u32,

    /// Maximum poll interval in milliseconds
    pub max_poll_interval_ms: u32,

    /// Offset reset policy (earliest, latest)
    pub auto_offset_reset: String,

    /// Subscription timeout in milliseconds
    pub connection_timeout_ms: u64,

    /// SASL/PLAIN user; enables SASL_SSL when set
    pub username: Option<String>,

    /// SASL/PLAIN password, falls back to `KAFKA_PASSWORD`
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Additional Kafka properties
    pub kafka_properties: HashMap<String, String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "metric-ingest".to_string(),
            topics: vec!["metrics".to_string()],
            concurrency: 5,
            max_poll_records: 1000,
            poll_timeout_ms: 1000,
            batch_linger_ms: 200,
            session_timeout_ms: 30000,
            max_poll_interval_ms: 300000,
            auto_offset_reset: "latest".to_string(),
            connection_timeout_ms: 30000,
            username: None,
            password: None,
            kafka_properties: HashMap::new(),
        }
    }
}

/// Builder for ConsumerConfig
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    /// Create a new consumer config builder
    pub fn new() -> Self {
        Self {
            config: ConsumerConfig::default(),
        }
    }

    /// Set the broker addresses
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.config.brokers = brokers.into();
        self
    }

    /// Set the consumer group ID
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.config.group_id = group_id.into();
        self
    }

    /// Set the topics to consume
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.config.topics = topics;
        self
    }

    /// Set the number of workers
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the maximum batch size
    pub fn max_poll_records(mut self, max: usize) -> Self {
        self.config.max_poll_records = max;
        self
    }

    /// Set the poll timeout
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the offset reset policy
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.config.auto_offset_reset = policy.into();
        self
    }

    /// Enable SASL/PLAIN authentication
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Add a custom Kafka property
    pub fn kafka_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.kafka_properties.insert(key.into(), value.into());
        self
    }

    /// Build the consumer configuration
    pub fn build(self) -> ConsumerConfig {
        self.config
    }
}

impl Default for ConsumerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerConfig {
    /// Create a new consumer config builder
    pub fn builder() -> ConsumerConfigBuilder {
        ConsumerConfigBuilder::new()
    }

    /// Poll timeout as a duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Batch linger as a duration
    pub fn batch_linger(&self) -> Duration {
        Duration::from_millis(self.batch_linger_ms)
    }

    /// Subscription timeout as a duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Configured password, else `KAFKA_PASSWORD`
    pub fn resolved_password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var(PASSWORD_ENV).ok())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.brokers.is_empty() {
            return Err("Brokers cannot be empty".to_string());
        }

        if self.group_id.is_empty() {
            return Err("Group ID cannot be empty".to_string());
        }

        if self.topics.is_empty() || self.topics.iter().any(|t| t.is_empty()) {
            return Err("Topics cannot be empty".to_string());
        }

        if self.concurrency == 0 {
            return Err("Concurrency must be greater than 0".to_string());
        }

        if self.max_poll_records == 0 {
            return Err("max_poll_records must be greater than 0".to_string());
        }

        if self.poll_timeout_ms == 0 {
            return Err("Poll timeout must be greater than 0".to_string());
        }

        if !matches!(self.auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(format!(
                "auto_offset_reset must be 'earliest' or 'latest', got '{}'",
                self.auto_offset_reset
            ));
        }

        if self.username.as_deref().is_some_and(str::is_empty) {
            return Err("Username cannot be empty when set".to_string());
        }

        Ok(())
    }

    /// librdkafka client properties for one worker's consumer
    pub fn client_properties(&self) -> ConsumerResult<Vec<(String, String)>> {
        let mut props = vec![
            ("bootstrap.servers".to_string(), self.brokers.clone()),
            ("group.id".to_string(), self.group_id.clone()),
            ("enable.auto.commit".to_string(), "false".to_string()),
            ("session.timeout.ms".to_string(), self.session_timeout_ms.to_string()),
            ("max.poll.interval.ms".to_string(), self.max_poll_interval_ms.to_string()),
            ("auto.offset.reset".to_string(), self.auto_offset_reset.clone()),
        ];

        if let Some(username) = &self.username {
            let password = self.resolved_password().ok_or_else(|| {
                ConsumerError::ConfigError(format!(
                    "username '{}' configured without a password (set kafka.password or {})",
                    username, PASSWORD_ENV
                ))
            })?;
            props.push(("security.protocol".to_string(), "SASL_SSL".to_string()));
            props.push(("sasl.mechanism".to_string(), "PLAIN".to_string()));
            props.push(("sasl.username".to_string(), username.clone()));
            props.push(("sasl.password".to_string(), password));
            props.push((
                "ssl.endpoint.identification.algorithm".to_string(),
                "https".to_string(),
            ));
        }

        let mut extra: Vec<_> = self.kafka_properties.iter().collect();
        extra.sort();
        for (key, value) in extra {
            if !ALLOWED_KAFKA_PROPS.contains(&key.as_str()) {
                return Err(ConsumerError::ConfigError(format!(
                    "Disallowed Kafka property '{}'. Allowed properties: {:?}",
                    key, ALLOWED_KAFKA_PROPS
                )));
            }
            props.push((key.clone(), value.clone()));
        }

        Ok(props)
    }
}
