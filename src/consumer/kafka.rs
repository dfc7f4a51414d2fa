//! Kafka batch source backed by an rdkafka `StreamConsumer`

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info};

use super::config::ConsumerConfig;
use super::error::{ConsumerError, ConsumerResult};
use super::offset_manager::CommitPlan;
use super::source::{Acknowledge, Batch, BatchSource};
use crate::event::RawMessage;

/// One worker's consumer in the group
pub struct KafkaBatchSource {
    worker_id: usize,
    consumer: Arc<StreamConsumer>,
    max_records: usize,
    poll_timeout: Duration,
    linger: Duration,
}

impl KafkaBatchSource {
    /// Create a consumer and subscribe it to the configured topics
    pub async fn connect(config: &ConsumerConfig, worker_id: usize) -> ConsumerResult<Self> {
        config.validate().map_err(ConsumerError::ConfigError)?;

        let mut client_config = ClientConfig::new();
        for (key, value) in config.client_properties()? {
            client_config.set(key, value);
        }

        let consumer: StreamConsumer = client_config.create().map_err(|e| {
            ConsumerError::ConnectionError(format!("Failed to create consumer: {}", e))
        })?;

        let topics: Vec<&str> = config.topics.iter().map(|s| s.as_str()).collect();
        timeout(config.connection_timeout(), async {
            consumer
                .subscribe(&topics)
                .map_err(|e| ConsumerError::ConnectionError(format!("Failed to subscribe: {}", e)))
        })
        .await
        .map_err(|_| ConsumerError::Timeout("Subscription timeout".to_string()))??;

        info!("Worker {} subscribed to topics: {:?}", worker_id, config.topics);

        Ok(Self {
            worker_id,
            consumer: Arc::new(consumer),
            max_records: config.max_poll_records,
            poll_timeout: config.poll_timeout(),
            linger: config.batch_linger(),
        })
    }

    /// Connect `config.concurrency` sources
    pub async fn connect_all(config: &ConsumerConfig) -> ConsumerResult<Vec<Self>> {
        let mut sources = Vec::with_capacity(config.concurrency);
        for worker_id in 0..config.concurrency {
            sources.push(Self::connect(config, worker_id).await?);
        }
        Ok(sources)
    }

    async fn recv(&self) -> ConsumerResult<RawMessage> {
        let message = self.consumer.recv().await?;
        Ok(RawMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| k.to_vec()),
            payload: message.payload().map(|p| p.to_vec()),
        })
    }
}

#[async_trait]
impl BatchSource for KafkaBatchSource {
    async fn next_batch(&mut self) -> ConsumerResult<Option<Batch>> {
        let first = match timeout(self.poll_timeout, self.recv()).await {
            Ok(message) => message?,
            Err(_) => return Ok(None),
        };

        let mut messages = vec![first];
        let deadline = Instant::now() + self.linger;
        while messages.len() < self.max_records {
            match timeout_at(deadline, self.recv()).await {
                Ok(Ok(message)) => messages.push(message),
                Ok(Err(e)) => {
                    debug!("Worker {} stopped filling batch early: {}", self.worker_id, e);
                    break;
                }
                Err(_) => break,
            }
        }

        debug!("Worker {} pulled {} messages", self.worker_id, messages.len());
        let ack = KafkaAck {
            consumer: self.consumer.clone(),
            plan: CommitPlan::from_messages(&messages),
        };
        Ok(Some(Batch::new(messages, Box::new(ack))))
    }

    fn pause(&mut self) -> ConsumerResult<()> {
        let assignment = self.consumer.assignment()?;
        self.consumer.pause(&assignment)?;
        Ok(())
    }

    fn resume(&mut self) -> ConsumerResult<()> {
        let assignment = self.consumer.assignment()?;
        self.consumer.resume(&assignment)?;
        Ok(())
    }
}

/// Commits a batch's offsets synchronously
struct KafkaAck {
    consumer: Arc<StreamConsumer>,
    plan: CommitPlan,
}

impl Acknowledge for KafkaAck {
    fn acknowledge(self: Box<Self>) -> ConsumerResult<()> {
        if self.plan.is_empty() {
            return Ok(());
        }
        let tpl = self.plan.to_topic_partition_list()?;
        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| ConsumerError::OffsetError(format!("Failed to commit offsets: {}", e)))?;
        debug!("Committed offsets for {} partitions", self.plan.len());
        Ok(())
    }
}
