//! Batch sources and acknowledgment handles
//!
//! A [`BatchSource`] hands out [`Batch`]es. Each batch owns a boxed
//! [`Acknowledge`] handle that is consumed when it is invoked, so a batch
//! can be acknowledged at most once.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::error::ConsumerResult;
use crate::event::RawMessage;

/// Advances the consumption position past a batch
pub trait Acknowledge: Send {
    /// Commit the batch. Consumes the handle.
    fn acknowledge(self: Box<Self>) -> ConsumerResult<()>;
}

/// Messages pulled together, plus their acknowledgment handle
pub struct Batch {
    messages: Vec<RawMessage>,
    ack: Box<dyn Acknowledge>,
}

impl Batch {
    /// Create a batch
    pub fn new(messages: Vec<RawMessage>, ack: Box<dyn Acknowledge>) -> Self {
        Self { messages, ack }
    }

    /// Messages in delivery order
    pub fn messages(&self) -> &[RawMessage] {
        &self.messages
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the batch has no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Split into messages and the acknowledgment handle
    pub fn into_parts(self) -> (Vec<RawMessage>, Box<dyn Acknowledge>) {
        (self.messages, self.ack)
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("messages", &self.messages.len())
            .finish()
    }
}

/// Where workers pull batches from. One source per worker.
#[async_trait]
pub trait BatchSource: Send + 'static {
    /// Wait up to the source's poll timeout for the next batch.
    /// `Ok(None)` means nothing arrived in time.
    async fn next_batch(&mut self) -> ConsumerResult<Option<Batch>>;

    /// Stop fetching while the pipeline is stopped
    fn pause(&mut self) -> ConsumerResult<()> {
        Ok(())
    }

    /// Resume fetching
    fn resume(&mut self) -> ConsumerResult<()> {
        Ok(())
    }
}

/// Record of acknowledged batches, shared with a [`MemorySource`]
#[derive(Debug, Clone, Default)]
pub struct AckLog {
    acked: Arc<Mutex<Vec<Vec<i64>>>>,
}

impl AckLog {
    /// Offsets of every acknowledged batch, in acknowledgment order
    pub fn batches(&self) -> Vec<Vec<i64>> {
        self.acked.lock().clone()
    }

    /// Number of acknowledgments issued
    pub fn count(&self) -> usize {
        self.acked.lock().len()
    }
}

struct MemoryAck {
    offsets: Vec<i64>,
    log: AckLog,
}

impl Acknowledge for MemoryAck {
    fn acknowledge(self: Box<Self>) -> ConsumerResult<()> {
        self.log.acked.lock().push(self.offsets);
        Ok(())
    }
}

/// In-process source fed from queued message lists
///
/// Used for local runs without a broker and for tests.
pub struct MemorySource {
    pending: Arc<Mutex<VecDeque<Vec<RawMessage>>>>,
    log: AckLog,
    poll_timeout: Duration,
    paused: bool,
}

impl MemorySource {
    /// Create an empty source that idles `poll_timeout` when drained
    pub fn new(poll_timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(VecDeque::new())),
            log: AckLog::default(),
            poll_timeout,
            paused: false,
        }
    }

    /// Queue a batch
    pub fn push(&self, messages: Vec<RawMessage>) {
        self.pending.lock().push_back(messages);
    }

    /// Handle for queueing batches after the source moved into a worker
    pub fn feeder(&self) -> MemoryFeeder {
        MemoryFeeder {
            pending: self.pending.clone(),
        }
    }

    /// Acknowledgment record of this source
    pub fn ack_log(&self) -> AckLog {
        self.log.clone()
    }

    /// Whether the source is currently paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

/// Queues batches into a [`MemorySource`]
#[derive(Clone)]
pub struct MemoryFeeder {
    pending: Arc<Mutex<VecDeque<Vec<RawMessage>>>>,
}

impl MemoryFeeder {
    /// Queue a batch
    pub fn push(&self, messages: Vec<RawMessage>) {
        self.pending.lock().push_back(messages);
    }

    /// Batches not yet pulled
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl BatchSource for MemorySource {
    async fn next_batch(&mut self) -> ConsumerResult<Option<Batch>> {
        let next = if self.paused {
            None
        } else {
            self.pending.lock().pop_front()
        };

        match next {
            Some(messages) => {
                let ack = MemoryAck {
                    offsets: messages.iter().map(|m| m.offset).collect(),
                    log: self.log.clone(),
                };
                Ok(Some(Batch::new(messages, Box::new(ack))))
            }
            None => {
                tokio::time::sleep(self.poll_timeout).await;
                Ok(None)
            }
        }
    }

    fn pause(&mut self) -> ConsumerResult<()> {
        self.paused = true;
        Ok(())
    }

    fn resume(&mut self) -> ConsumerResult<()> {
        self.paused = false;
        Ok(())
    }
}
