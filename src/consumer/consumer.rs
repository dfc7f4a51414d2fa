//! Worker pool pulling batches from sources and handing them to a processor

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::control::PipelineControl;
use super::error::ErrorSeverity;
use super::processor::BatchProcessor;
use super::source::BatchSource;

/// Pause after a failed pull before trying again
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Runs one worker task per source
///
/// Each worker pulls a batch, processes it to acknowledgment, then pulls the
/// next one. Workers only pull while the pipeline is running and exit once
/// shutdown is signalled.
pub struct PipelineRunner<S: BatchSource> {
    sources: Vec<S>,
    processor: Arc<dyn BatchProcessor>,
    control: Arc<PipelineControl>,
    error_backoff: Duration,
}

impl<S: BatchSource> PipelineRunner<S> {
    /// Create a runner with one worker per source
    pub fn new(
        sources: Vec<S>,
        processor: Arc<dyn BatchProcessor>,
        control: Arc<PipelineControl>,
    ) -> Self {
        Self {
            sources,
            processor,
            control,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }

    /// Set the pause after a failed pull
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Number of workers that will be spawned
    pub fn worker_count(&self) -> usize {
        self.sources.len()
    }

    /// Spawn every worker
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        info!("Starting pipeline with {} workers", self.sources.len());

        self.sources
            .into_iter()
            .enumerate()
            .map(|(worker_id, source)| {
                let worker = Worker {
                    id: worker_id,
                    source,
                    processor: self.processor.clone(),
                    control: self.control.clone(),
                    error_backoff: self.error_backoff,
                };
                tokio::spawn(worker.run())
            })
            .collect()
    }
}

/// Wait for spawned workers, giving up after `timeout`
pub async fn join_workers(handles: Vec<JoinHandle<()>>, timeout: Duration) -> usize {
    let total = handles.len();
    let mut finished = 0;

    for (i, handle) in handles.into_iter().enumerate() {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => finished += 1,
            Ok(Err(e)) => warn!("Worker {} ended abnormally: {}", i, e),
            Err(_) => warn!("Worker {} did not stop within {:?}", i, timeout),
        }
    }

    info!("{}/{} workers stopped cleanly", finished, total);
    finished
}

struct Worker<S: BatchSource> {
    id: usize,
    source: S,
    processor: Arc<dyn BatchProcessor>,
    control: Arc<PipelineControl>,
    error_backoff: Duration,
}

impl<S: BatchSource> Worker<S> {
    async fn run(mut self) {
        let mut signals = self.control.subscribe();
        let mut active = false;
        let mut paused = false;

        debug!("Worker {} started", self.id);

        loop {
            if *signals.shutdown.borrow() {
                break;
            }

            let running = *signals.running.borrow_and_update();
            if !running {
                if !paused {
                    if let Err(e) = self.source.pause() {
                        warn!("Worker {} failed to pause its source: {}", self.id, e);
                    }
                    paused = true;
                }
                if active {
                    self.control.worker_stopped();
                    active = false;
                    info!("Worker {} idle", self.id);
                }

                tokio::select! {
                    _ = signals.running.changed() => {}
                    _ = signals.shutdown.changed() => {}
                }
                continue;
            }

            if paused {
                if let Err(e) = self.source.resume() {
                    warn!("Worker {} failed to resume its source: {}", self.id, e);
                }
                paused = false;
            }
            if !active {
                self.control.worker_started();
                active = true;
                info!("Worker {} consuming", self.id);
            }

            match self.source.next_batch().await {
                Ok(Some(batch)) => {
                    let _inflight = self.control.begin_batch();
                    let size = batch.len();
                    let report = self.processor.process_batch(batch).await;
                    debug!(
                        "Worker {} finished batch of {} with outcome {:?}",
                        self.id, size, report.outcome
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    match e.severity() {
                        ErrorSeverity::Warning => warn!("Worker {} pull failed: {}", self.id, e),
                        _ => error!("Worker {} pull failed: {}", self.id, e),
                    }
                    self.control.metrics().record_error(e.kind());
                    tokio::time::sleep(self.error_backoff).await;
                }
            }
        }

        if active {
            self.control.worker_stopped();
        }
        info!("Worker {} stopped", self.id);
    }
}
