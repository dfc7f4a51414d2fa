/// Error types for the ingestion pipeline
use thiserror::Error;

/// A single message could not be decoded into a metric event.
///
/// Terminal for that message: it is logged and counted, never retried and
/// never quarantined.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The message carried no payload at all
    #[error("message at partition {partition} offset {offset} has no payload")]
    EmptyPayload {
        /// Source partition
        partition: i32,
        /// Source offset
        offset: i64,
    },

    /// The payload was not a decodable metric event
    #[error("malformed event at partition {partition} offset {offset}: {source}")]
    Malformed {
        /// Source partition
        partition: i32,
        /// Source offset
        offset: i64,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },
}

impl ParseError {
    /// Partition of the message that failed to parse
    pub fn partition(&self) -> i32 {
        match self {
            ParseError::EmptyPayload { partition, .. } | ParseError::Malformed { partition, .. } => {
                *partition
            }
        }
    }

    /// Offset of the message that failed to parse
    pub fn offset(&self) -> i64 {
        match self {
            ParseError::EmptyPayload { offset, .. } | ParseError::Malformed { offset, .. } => *offset,
        }
    }
}

/// Failure while writing rows to the warehouse
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    /// The whole request failed (network, auth, 5xx); every submitted row is pending
    #[error("warehouse request failed: {0}")]
    Transport(String),

    /// The warehouse accepted the request but rejected some rows
    #[error("warehouse rejected {rejected} of {submitted} rows")]
    RowsRejected {
        /// Number of rejected rows
        rejected: usize,
        /// Number of rows in the submission
        submitted: usize,
    },

    /// The retry budget ran out with rows still unwritten
    #[error("{remaining} rows still unwritten after {attempts} attempts")]
    Exhausted {
        /// Rows that were never accepted
        remaining: usize,
        /// Submissions made
        attempts: u32,
    },
}

impl WriteError {
    /// Whether another submission may still succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, WriteError::Exhausted { .. })
    }
}

/// The dead-letter sink could not persist rows. Always means data loss.
#[derive(Error, Debug)]
pub enum QuarantineError {
    /// No dead-letter destination is configured
    #[error("dead-letter sink is disabled, {rows} rows not persisted")]
    Disabled {
        /// Rows that were dropped
        rows: usize,
    },

    /// The object store rejected the write
    #[error("failed to write dead-letter object {path}: {source}")]
    Store {
        /// Object location
        path: String,
        /// Underlying store error
        #[source]
        source: object_store::Error,
    },

    /// A row could not be encoded as JSON
    #[error("failed to encode dead-letter row: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The normalization lookup table could not be loaded. Fatal at startup.
#[derive(Error, Debug)]
pub enum CacheLoadError {
    /// The lookup query failed
    #[error("lookup query against {table} failed: {reason}")]
    Query {
        /// Lookup table name
        table: String,
        /// Failure description
        reason: String,
    },

    /// A lookup row did not carry the expected columns
    #[error("lookup row {row} is missing column {column}")]
    MalformedRow {
        /// Zero-based row index in the result set
        row: usize,
        /// Missing column name
        column: &'static str,
    },
}

/// Invalid settings
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Settings file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path of the file
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid YAML for the settings schema
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value is out of range or missing
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that can abort startup of the service
#[derive(Error, Debug)]
pub enum IngestError {
    /// Configuration is invalid or incomplete
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The normalization cache failed to load
    #[error(transparent)]
    CacheLoad(#[from] CacheLoadError),

    /// The dead-letter destination could not be built
    #[error("dead-letter store error: {0}")]
    DeadLetter(#[from] object_store::Error),

    /// The warehouse client could not be built
    #[error("warehouse client error: {0}")]
    Warehouse(String),

    /// Broker setup failed
    #[error(transparent)]
    Consumer(#[from] crate::consumer::error::ConsumerError),

    /// Metrics registry setup failed
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result type for startup operations
pub type Result<T> = std::result::Result<T, IngestError>;
