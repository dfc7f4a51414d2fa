//! Partial-failure retry loop for warehouse inserts

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::WarehouseClient;
use crate::consumer::retry::RetryPolicy;
use crate::error::WriteError;
use crate::transform::WarehouseRow;

/// What happened to one chunk of rows
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// Rows never accepted; empty when the whole chunk was written
    pub failed: Vec<WarehouseRow>,
    /// Rows accepted by the warehouse
    pub written: usize,
    /// Submissions made
    pub attempts: u32,
    /// Rows reported as rejected, summed over all submissions
    pub rejections: usize,
    /// Final error when rows remain unwritten
    pub last_error: Option<WriteError>,
}

impl WriteOutcome {
    /// Whether every row was written
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Writes rows, resubmitting only the rejected subset between backoffs
#[derive(Clone)]
pub struct BatchWriter {
    client: Arc<dyn WarehouseClient>,
    policy: RetryPolicy,
}

impl BatchWriter {
    /// Create a writer over a warehouse client
    pub fn new(client: Arc<dyn WarehouseClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Write `rows`, retrying rejected rows until the attempt budget runs out
    ///
    /// Sleeps only between submissions. Rows left over are returned in
    /// `failed`; none are dropped.
    pub async fn write(&self, rows: Vec<WarehouseRow>) -> WriteOutcome {
        let total = rows.len();
        let started = Instant::now();
        let mut pending = rows;
        let mut attempts = 0u32;
        let mut rejections = 0usize;
        let mut last_error = None;

        while !pending.is_empty() {
            if attempts > 0 {
                if !self.policy.should_retry(attempts) {
                    break;
                }
                let backoff = self.policy.next_backoff(attempts);
                warn!(
                    "Retrying {} rows (attempt {}/{}) in {:?}",
                    pending.len(),
                    attempts + 1,
                    self.policy.max_attempts,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }

            attempts += 1;
            let submitted = pending.len();

            match self.client.insert_rows(&pending).await {
                Ok(response) if response.is_success() => {
                    pending.clear();
                    last_error = None;
                }
                Ok(response) => {
                    let mut indices = BTreeSet::new();
                    for rejection in &response.rejected {
                        if rejection.index < submitted {
                            indices.insert(rejection.index);
                        } else {
                            warn!(
                                "Ignoring rejection for row {} outside submission of {}",
                                rejection.index, submitted
                            );
                        }
                    }

                    if indices.is_empty() {
                        warn!("Warehouse reported rejections with no usable row index, resubmitting all {} rows", submitted);
                    } else {
                        if let Some(first) = response.rejected.first() {
                            debug!("First rejection reason: {}", first.reason);
                        }
                        pending = pending
                            .into_iter()
                            .enumerate()
                            .filter(|(i, _)| indices.contains(i))
                            .map(|(_, row)| row)
                            .collect();
                    }

                    rejections += pending.len();
                    last_error = Some(WriteError::RowsRejected {
                        rejected: pending.len(),
                        submitted,
                    });
                }
                Err(e) => {
                    warn!("Warehouse insert of {} rows failed: {}", submitted, e);
                    last_error = Some(e);
                }
            }
        }

        if !pending.is_empty() {
            last_error = Some(WriteError::Exhausted {
                remaining: pending.len(),
                attempts,
            });
        }

        debug!(
            "Wrote {}/{} rows in {} attempts ({:?})",
            total - pending.len(),
            total,
            attempts,
            started.elapsed()
        );

        WriteOutcome {
            written: total - pending.len(),
            failed: pending,
            attempts,
            rejections,
            last_error,
        }
    }
}
