//! Device metric ingestion from Kafka into BigQuery
//!
//! Each worker pulls a batch of JSON metric events, normalizes metric names
//! through a lookup table loaded at startup, and streams the resulting rows
//! into the warehouse. Rows the warehouse keeps rejecting after the retry
//! budget are quarantined as NDJSON objects in a dead-letter bucket. Every
//! batch is acknowledged exactly once after all of its rows are written,
//! quarantined or reported lost.
//!
//! # Example
//!
//! ```no_run
//! use metric_ingest::event::{parse_event, RawMessage};
//! use metric_ingest::normalize::NormalizationCache;
//! use metric_ingest::transform::RowTransformer;
//! use std::sync::Arc;
//!
//! # fn example() -> anyhow::Result<()> {
//! let cache = Arc::new(NormalizationCache::from_entries([("ifInOctets", "interface_in_octets")]));
//! let transformer = RowTransformer::new(cache);
//!
//! let message = RawMessage::new(
//!     "metrics",
//!     0,
//!     42,
//!     r#"{"device_name":"edge-01","parameter_name":"ifInOctets","raw_value":42}"#,
//! );
//! let row = transformer.transform(&parse_event(&message)?);
//! assert_eq!(row.content.metric_type, "interface_in_octets");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub use config::Settings;
pub use error::{IngestError, Result};
pub use event::{MetricEvent, RawMessage};
pub use normalize::NormalizationCache;
pub use transform::{RowContent, RowTransformer, WarehouseRow};

/// Settings file schema
pub mod config;

/// Consumption, batch processing and acknowledgment
pub mod consumer;

/// Error types
pub mod error;

/// Broker messages and metric events
pub mod event;

/// Metric name normalization
pub mod normalize;

/// HTTP control surface
pub mod service;

/// Logging setup
pub mod telemetry;

/// Event to warehouse row transformation
pub mod transform;

/// Warehouse client and batch writer
pub mod warehouse;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
