//! Start/stop control and graceful shutdown of the worker pool

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::metrics::PipelineMetrics;

/// Answer to a status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// At least one worker is consuming
    pub running: bool,
    /// Messages delivered since startup
    pub consumed: u64,
    /// Rows written since startup
    pub pushed: u64,
}

/// Receivers a worker watches between batches
#[derive(Debug, Clone)]
pub struct ControlSignals {
    /// Desired running state
    pub running: watch::Receiver<bool>,
    /// Flips to true once on shutdown
    pub shutdown: watch::Receiver<bool>,
}

/// Shared lifecycle state of the pipeline
///
/// `stop` only keeps workers from pulling new batches; a batch already
/// pulled always runs to acknowledgment.
#[derive(Debug)]
pub struct PipelineControl {
    running_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    active_workers: AtomicUsize,
    inflight_batches: AtomicUsize,
    metrics: Arc<PipelineMetrics>,
    shutdown_start: Mutex<Option<Instant>>,
}

impl PipelineControl {
    /// Create control state; workers consume immediately when `start_running`
    pub fn new(metrics: Arc<PipelineMetrics>, start_running: bool) -> Self {
        let (running_tx, _) = watch::channel(start_running);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            running_tx,
            shutdown_tx,
            active_workers: AtomicUsize::new(0),
            inflight_batches: AtomicUsize::new(0),
            metrics,
            shutdown_start: Mutex::new(None),
        }
    }

    /// Let workers pull batches
    pub fn start(&self) {
        if self.is_shutting_down() {
            warn!("Ignoring start request during shutdown");
            return;
        }
        if !self.running_tx.send_replace(true) {
            info!("Pipeline started");
        }
    }

    /// Stop pulling new batches
    pub fn stop(&self) {
        if self.running_tx.send_replace(false) {
            info!(
                "Pipeline stopped, {} batches still in flight",
                self.inflight_count()
            );
        }
    }

    /// Whether workers have been asked to consume
    pub fn is_requested_running(&self) -> bool {
        *self.running_tx.borrow()
    }

    /// Current status
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            running: self.active_workers() > 0,
            consumed: self.metrics.messages_consumed.get(),
            pushed: self.metrics.rows_pushed.get(),
        }
    }

    /// Shared metrics
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Receivers for a new worker
    pub fn subscribe(&self) -> ControlSignals {
        ControlSignals {
            running: self.running_tx.subscribe(),
            shutdown: self.shutdown_tx.subscribe(),
        }
    }

    /// Stop for good and wake every worker
    pub fn shutdown(&self) {
        {
            let mut start = self.shutdown_start.lock();
            if start.is_some() {
                return;
            }
            *start = Some(Instant::now());
        }
        self.running_tx.send_replace(false);
        self.shutdown_tx.send_replace(true);
        info!("Shutdown initiated");
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Time since shutdown began
    pub fn shutdown_duration(&self) -> Option<Duration> {
        self.shutdown_start.lock().map(|start| start.elapsed())
    }

    /// A worker began consuming
    pub fn worker_started(&self) {
        let count = self.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.active_workers.set(count as i64);
        debug!("Active workers: {}", count);
    }

    /// A worker stopped consuming
    pub fn worker_stopped(&self) {
        let previous = self
            .active_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        let count = previous.saturating_sub(1);
        self.metrics.active_workers.set(count as i64);
        debug!("Active workers: {}", count);
    }

    /// Workers currently consuming
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Mark a batch in flight until the guard drops
    pub fn begin_batch(self: &Arc<Self>) -> InflightGuard {
        self.inflight_batches.fetch_add(1, Ordering::SeqCst);
        InflightGuard {
            control: Arc::clone(self),
        }
    }

    /// Batches pulled and not yet acknowledged
    pub fn inflight_count(&self) -> usize {
        self.inflight_batches.load(Ordering::SeqCst)
    }

    /// Wait for in-flight batches to finish
    pub async fn wait_for_idle(&self, timeout: Duration) -> Result<(), String> {
        let deadline = Instant::now() + timeout;

        while self.inflight_count() > 0 {
            if Instant::now() > deadline {
                let count = self.inflight_count();
                warn!("Shutdown timeout with {} batches still in flight", count);
                return Err(format!("Timeout with {} batches in flight", count));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Some(elapsed) = self.shutdown_duration() {
            info!("Pipeline idle {:?} after shutdown began", elapsed);
        }
        Ok(())
    }
}

/// Decrements the in-flight batch count on drop
#[derive(Debug)]
pub struct InflightGuard {
    control: Arc<PipelineControl>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.control.inflight_batches.fetch_sub(1, Ordering::SeqCst);
    }
}
