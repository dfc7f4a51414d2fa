//! Batch processing: parse, transform, write, quarantine, acknowledge
//!
//! Every batch walks the same state machine:
//!
//! ```text
//! Received → Parsed → Transformed → WriteAttempted → Written | Quarantined | Lost → Acknowledged
//! ```
//!
//! The acknowledgment handle is invoked exactly once, after every row has
//! reached a terminal state, whether or not anything failed on the way.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::dlq::DeadLetterSink;
use super::metrics::PipelineMetrics;
use super::source::Batch;
use crate::event::{parse_event, RawMessage};
use crate::normalize::NormalizationCache;
use crate::transform::{RowTransformer, WarehouseRow};
use crate::warehouse::BatchWriter;

/// Rows per warehouse submission
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Lifecycle of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Pulled from the source
    Received,
    /// Messages decoded; malformed ones dropped
    Parsed,
    /// Rows built
    Transformed,
    /// At least one warehouse submission made
    WriteAttempted,
    /// Every row written
    Written,
    /// Every unwritten row persisted to the dead-letter sink
    Quarantined,
    /// Some unwritten rows could not be quarantined
    Lost,
    /// Consumption position advanced past the batch
    Acknowledged,
}

impl BatchState {
    /// Whether `next` is a legal successor
    pub fn can_transition_to(self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, next),
            (Received, Parsed)
                | (Parsed, Transformed)
                | (Transformed, WriteAttempted)
                | (Transformed, Written)
                | (WriteAttempted, Written)
                | (WriteAttempted, Quarantined)
                | (WriteAttempted, Lost)
                | (Written, Acknowledged)
                | (Quarantined, Acknowledged)
                | (Lost, Acknowledged)
        )
    }

    /// Whether every row has a final disposition
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchState::Written | BatchState::Quarantined | BatchState::Lost | BatchState::Acknowledged
        )
    }
}

/// What happened to a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// Messages in the batch
    pub received: usize,
    /// Messages decoded into events
    pub parsed: usize,
    /// Messages dropped as malformed
    pub parse_failures: usize,
    /// Rows accepted by the warehouse
    pub written: usize,
    /// Rows persisted to the dead-letter sink
    pub quarantined: usize,
    /// Rows neither written nor quarantined
    pub lost: usize,
    /// Warehouse submissions across all chunks
    pub write_attempts: u32,
    /// Chunks the rows were split into
    pub chunks: usize,
    /// Final state
    pub state: BatchState,
    /// Disposition before acknowledgment
    pub outcome: BatchState,
    /// Whether the acknowledgment succeeded
    pub acknowledged: bool,
}

impl BatchReport {
    fn new(received: usize) -> Self {
        Self {
            received,
            parsed: 0,
            parse_failures: 0,
            written: 0,
            quarantined: 0,
            lost: 0,
            write_attempts: 0,
            chunks: 0,
            state: BatchState::Received,
            outcome: BatchState::Received,
            acknowledged: false,
        }
    }

    fn advance(&mut self, next: BatchState) {
        if !self.state.can_transition_to(next) {
            warn!("Unexpected batch transition {:?} -> {:?}", self.state, next);
        }
        debug!("Batch {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Something that fully handles pulled batches, acknowledgment included
#[async_trait]
pub trait BatchProcessor: Send + Sync + 'static {
    /// Process the batch and invoke its acknowledgment exactly once
    async fn process_batch(&self, batch: Batch) -> BatchReport;
}

/// The ingestion controller
pub struct BatchPipeline {
    transformer: RowTransformer,
    writer: BatchWriter,
    dead_letter: Arc<dyn DeadLetterSink>,
    metrics: Arc<PipelineMetrics>,
    chunk_size: usize,
}

impl BatchPipeline {
    /// Create a pipeline over a loaded cache, a writer and a dead-letter sink
    pub fn new(
        cache: Arc<NormalizationCache>,
        writer: BatchWriter,
        dead_letter: Arc<dyn DeadLetterSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            transformer: RowTransformer::new(cache),
            writer,
            dead_letter,
            metrics,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set rows per warehouse submission (at least 1)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Rows per warehouse submission
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Shared metrics
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Run a batch to its terminal state without acknowledging it
    pub async fn process(&self, messages: &[RawMessage]) -> BatchReport {
        let mut report = BatchReport::new(messages.len());
        self.metrics.messages_consumed.inc_by(messages.len() as u64);

        let mut events = Vec::with_capacity(messages.len());
        for message in messages {
            match parse_event(message) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!("Dropping unparseable message: {}", e);
                    report.parse_failures += 1;
                    self.metrics.parse_failures.inc();
                }
            }
        }
        report.parsed = events.len();
        report.advance(BatchState::Parsed);

        let rows: Vec<WarehouseRow> = events.iter().map(|e| self.transformer.transform(e)).collect();
        report.advance(BatchState::Transformed);

        if rows.is_empty() {
            report.advance(BatchState::Written);
            report.outcome = report.state;
            return report;
        }

        report.advance(BatchState::WriteAttempted);
        for chunk in rows.chunks(self.chunk_size) {
            report.chunks += 1;
            self.write_chunk(chunk.to_vec(), &mut report).await;
        }

        let outcome = if report.lost > 0 {
            BatchState::Lost
        } else if report.quarantined > 0 {
            BatchState::Quarantined
        } else {
            BatchState::Written
        };
        report.advance(outcome);
        report.outcome = outcome;
        report
    }

    async fn write_chunk(&self, rows: Vec<WarehouseRow>, report: &mut BatchReport) {
        let outcome = self.writer.write(rows).await;

        report.write_attempts += outcome.attempts;
        report.written += outcome.written;
        self.metrics.write_attempts.inc_by(outcome.attempts as u64);
        self.metrics.rows_rejected.inc_by(outcome.rejections as u64);
        self.metrics.rows_pushed.inc_by(outcome.written as u64);

        if outcome.failed.is_empty() {
            return;
        }

        if let Some(e) = &outcome.last_error {
            warn!("Chunk {} left {} rows unwritten: {}", report.chunks, outcome.failed.len(), e);
        }

        match self.dead_letter.quarantine(&outcome.failed).await {
            Ok(receipt) => {
                info!(
                    "Quarantined {} rows to {}",
                    receipt.rows, receipt.location
                );
                report.quarantined += outcome.failed.len();
                self.metrics.rows_quarantined.inc_by(outcome.failed.len() as u64);
            }
            Err(e) => {
                error!(
                    "DATA LOSS: {} rows could not be written or quarantined: {}",
                    outcome.failed.len(),
                    e
                );
                report.lost += outcome.failed.len();
                self.metrics.rows_lost.inc_by(outcome.failed.len() as u64);
                self.metrics.record_error("quarantine");
            }
        }
    }
}

#[async_trait]
impl BatchProcessor for BatchPipeline {
    async fn process_batch(&self, batch: Batch) -> BatchReport {
        let started = Instant::now();
        let (messages, ack) = batch.into_parts();

        let mut report = self.process(&messages).await;

        report.acknowledged = match ack.acknowledge() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to acknowledge batch of {} messages: {}", messages.len(), e);
                self.metrics.record_error("ack");
                false
            }
        };
        report.advance(BatchState::Acknowledged);
        self.metrics.record_batch(started.elapsed());

        debug!(
            "Batch done: {} received, {} written, {} quarantined, {} lost, {} malformed",
            report.received, report.written, report.quarantined, report.lost, report.parse_failures
        );
        report
    }
}
