//! Consumption side of the pipeline
//!
//! This module provides:
//! - Batch sources with exactly-once acknowledgment handles
//! - A worker pool with start/stop control and graceful shutdown
//! - The batch pipeline: parse, transform, write with retry, quarantine
//! - A dead-letter sink on object storage
//! - Manual offset commits for Kafka
//! - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use metric_ingest::consumer::{
//!     BatchPipeline, DisabledDeadLetterSink, MemorySource, PipelineControl, PipelineMetrics,
//!     PipelineRunner, RetryPolicy,
//! };
//! use metric_ingest::normalize::NormalizationCache;
//! use metric_ingest::warehouse::{BatchWriter, BigQueryClient, BigQuerySettings};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let metrics = Arc::new(PipelineMetrics::new()?);
//! let client = Arc::new(BigQueryClient::new(BigQuerySettings::default())?);
//! let writer = BatchWriter::new(client, RetryPolicy::default());
//! let pipeline = BatchPipeline::new(
//!     Arc::new(NormalizationCache::default()),
//!     writer,
//!     Arc::new(DisabledDeadLetterSink),
//!     metrics.clone(),
//! );
//!
//! let control = Arc::new(PipelineControl::new(metrics, true));
//! let source = MemorySource::new(Duration::from_millis(100));
//! let handles = PipelineRunner::new(vec![source], Arc::new(pipeline), control.clone()).spawn();
//!
//! control.shutdown();
//! metric_ingest::consumer::join_workers(handles, Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod control;
pub mod dlq;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod metrics;
pub mod offset_manager;
pub mod processor;
pub mod retry;
pub mod source;

pub use config::{ConsumerConfig, ConsumerConfigBuilder};
pub use consumer::{join_workers, PipelineRunner};
pub use control::{PipelineControl, PipelineStatus};
pub use dlq::{
    build_sink, DeadLetterSettings, DeadLetterSink, DisabledDeadLetterSink,
    ObjectStoreDeadLetterSink, QuarantineReceipt,
};
pub use error::{ConsumerError, ConsumerResult};
#[cfg(feature = "kafka")]
pub use kafka::KafkaBatchSource;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use offset_manager::CommitPlan;
pub use processor::{BatchPipeline, BatchProcessor, BatchReport, BatchState};
pub use retry::RetryPolicy;
pub use source::{Acknowledge, AckLog, Batch, BatchSource, MemoryFeeder, MemorySource};
