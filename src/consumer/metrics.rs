//! Pipeline metrics collection

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

const NAMESPACE: &str = "metric_ingest";

/// Counters shared by every worker and exported on `/metrics`
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    /// Messages delivered by the broker
    pub messages_consumed: IntCounter,
    /// Messages that failed to parse
    pub parse_failures: IntCounter,
    /// Rows accepted by the warehouse
    pub rows_pushed: IntCounter,
    /// Rows persisted to the dead-letter sink
    pub rows_quarantined: IntCounter,
    /// Rows neither written nor quarantined
    pub rows_lost: IntCounter,
    /// Warehouse submissions
    pub write_attempts: IntCounter,
    /// Rows rejected by the warehouse, counted per submission
    pub rows_rejected: IntCounter,
    /// Batches fully processed and acknowledged
    pub batches: IntCounter,
    /// Workers currently consuming
    pub active_workers: IntGauge,
    errors: IntCounterVec,
    batch_duration: Histogram,
}

fn counter(name: &str, help: &str) -> prometheus::Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))
}

impl PipelineMetrics {
    /// Create the metrics and register them in a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let metrics = Self {
            messages_consumed: counter("messages_consumed_total", "Messages delivered by the broker")?,
            parse_failures: counter("parse_failures_total", "Messages that could not be parsed")?,
            rows_pushed: counter("rows_pushed_total", "Rows written to the warehouse")?,
            rows_quarantined: counter("rows_quarantined_total", "Rows written to the dead-letter sink")?,
            rows_lost: counter("rows_lost_total", "Rows neither written nor quarantined")?,
            write_attempts: counter("write_attempts_total", "Warehouse insert submissions")?,
            rows_rejected: counter("rows_rejected_total", "Rows rejected by the warehouse")?,
            batches: counter("batches_total", "Batches processed and acknowledged")?,
            active_workers: IntGauge::with_opts(
                Opts::new("active_workers", "Workers currently consuming").namespace(NAMESPACE),
            )?,
            errors: IntCounterVec::new(
                Opts::new("errors_total", "Errors by kind").namespace(NAMESPACE),
                &["kind"],
            )?,
            batch_duration: Histogram::with_opts(
                HistogramOpts::new("batch_duration_seconds", "Time from pull to acknowledgment")
                    .namespace(NAMESPACE)
                    .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            )?,
            registry,
        };

        metrics.registry.register(Box::new(metrics.messages_consumed.clone()))?;
        metrics.registry.register(Box::new(metrics.parse_failures.clone()))?;
        metrics.registry.register(Box::new(metrics.rows_pushed.clone()))?;
        metrics.registry.register(Box::new(metrics.rows_quarantined.clone()))?;
        metrics.registry.register(Box::new(metrics.rows_lost.clone()))?;
        metrics.registry.register(Box::new(metrics.write_attempts.clone()))?;
        metrics.registry.register(Box::new(metrics.rows_rejected.clone()))?;
        metrics.registry.register(Box::new(metrics.batches.clone()))?;
        metrics.registry.register(Box::new(metrics.active_workers.clone()))?;
        metrics.registry.register(Box::new(metrics.errors.clone()))?;
        metrics.registry.register(Box::new(metrics.batch_duration.clone()))?;

        Ok(metrics)
    }

    /// Record an error by kind
    pub fn record_error(&self, kind: &str) {
        self.errors.with_label_values(&[kind]).inc();
    }

    /// Errors recorded for `kind`
    pub fn error_count(&self, kind: &str) -> u64 {
        self.errors.with_label_values(&[kind]).get()
    }

    /// Record the end-to-end time of one batch
    pub fn record_batch(&self, duration: Duration) {
        self.batches.inc();
        self.batch_duration.observe(duration.as_secs_f64());
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            consumed: self.messages_consumed.get(),
            parse_failures: self.parse_failures.get(),
            pushed: self.rows_pushed.get(),
            quarantined: self.rows_quarantined.get(),
            lost: self.rows_lost.get(),
            write_attempts: self.write_attempts.get(),
            batches: self.batches.get(),
        }
    }
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PipelineMetrics").field(&self.snapshot()).finish()
    }
}

/// Counter values at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Messages delivered
    pub consumed: u64,
    /// Messages that failed to parse
    pub parse_failures: u64,
    /// Rows written
    pub pushed: u64,
    /// Rows quarantined
    pub quarantined: u64,
    /// Rows lost
    pub lost: u64,
    /// Warehouse submissions
    pub write_attempts: u64,
    /// Batches acknowledged
    pub batches: u64,
}
