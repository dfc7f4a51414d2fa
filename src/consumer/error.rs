//! Consumer error types

use thiserror::Error;

/// Result type for consumer operations
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Broker side failures: creating consumers, pulling batches, committing offsets
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Kafka client errors
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    KafkaError(#[from] rdkafka::error::KafkaError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Connection errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Offset commit errors
    #[error("Offset error: {0}")]
    OffsetError(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl ConsumerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            #[cfg(feature = "kafka")]
            ConsumerError::KafkaError(e) => {
                !matches!(e, rdkafka::error::KafkaError::ClientCreation(_))
            }
            ConsumerError::ConnectionError(_) => true,
            ConsumerError::Timeout(_) => true,
            ConsumerError::OffsetError(_) => true,
            ConsumerError::ConfigError(_) => false,
        }
    }

    /// Get error severity
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ConsumerError::ConfigError(_) => ErrorSeverity::Fatal,
            ConsumerError::Timeout(_) => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Short label used as the `kind` of the error counter
    pub fn kind(&self) -> &'static str {
        match self {
            #[cfg(feature = "kafka")]
            ConsumerError::KafkaError(_) => "kafka",
            ConsumerError::ConfigError(_) => "config",
            ConsumerError::ConnectionError(_) => "connection",
            ConsumerError::OffsetError(_) => "offset",
            ConsumerError::Timeout(_) => "timeout",
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Warnings that don't stop processing
    Warning,
    /// Errors that may be retried
    Error,
    /// Fatal errors that stop the consumer
    Fatal,
}
