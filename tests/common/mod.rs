//! Fakes shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use metric_ingest::consumer::{
    BatchPipeline, DeadLetterSink, ObjectStoreDeadLetterSink, PipelineMetrics, RetryPolicy,
};
use metric_ingest::error::WriteError;
use metric_ingest::event::RawMessage;
use metric_ingest::normalize::NormalizationCache;
use metric_ingest::warehouse::{BatchWriter, InsertResponse, RowRejection, WarehouseClient};
use metric_ingest::WarehouseRow;
use object_store::memory::InMemory;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;

/// What the fake warehouse answers to one submission
#[derive(Debug, Clone)]
pub enum Reply {
    /// Accept every row
    Accept,
    /// Reject rows at these indices
    Reject(Vec<usize>),
    /// Reject every submitted row
    RejectAll,
    /// Fail the request as a whole
    Fail,
}

/// Warehouse that answers from a script and records every submission
#[derive(Default)]
pub struct ScriptedWarehouse {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Option<Reply>>,
    submissions: Mutex<Vec<Vec<WarehouseRow>>>,
}

impl ScriptedWarehouse {
    /// Answer with `replies` in order, then accept everything
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        })
    }

    /// Answer every submission with `reply`
    pub fn always(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            fallback: Mutex::new(Some(reply)),
            ..Default::default()
        })
    }

    /// Rows of every submission, in order
    pub fn submissions(&self) -> Vec<Vec<WarehouseRow>> {
        self.submissions.lock().clone()
    }

    /// Insert ids of every submission, in order
    pub fn submitted_ids(&self) -> Vec<Vec<String>> {
        self.submissions
            .lock()
            .iter()
            .map(|rows| rows.iter().map(|r| r.insert_id.clone()).collect())
            .collect()
    }
}

#[async_trait]
impl WarehouseClient for ScriptedWarehouse {
    async fn insert_rows(&self, rows: &[WarehouseRow]) -> Result<InsertResponse, WriteError> {
        self.submissions.lock().push(rows.to_vec());

        let reply = self
            .replies
            .lock()
            .pop_front()
            .or_else(|| self.fallback.lock().clone())
            .unwrap_or(Reply::Accept);

        let rejected: Vec<usize> = match reply {
            Reply::Accept => Vec::new(),
            Reply::Reject(indices) => indices,
            Reply::RejectAll => (0..rows.len()).collect(),
            Reply::Fail => return Err(WriteError::Transport("503 Service Unavailable".to_string())),
        };

        Ok(InsertResponse {
            rejected: rejected
                .into_iter()
                .map(|index| RowRejection {
                    index,
                    reason: "invalid".to_string(),
                })
                .collect(),
        })
    }
}

/// JSON payload of a well-formed metric event
pub fn event_json(device: &str, parameter: &str, raw_value: i64) -> String {
    json!({
        "device_type": "router",
        "device_name": device,
        "interface_name": "ge-0/0/1",
        "parameter_name": parameter,
        "raw_value": raw_value,
        "value": raw_value as f64 / 10.0,
        "timestamp": "2024-03-01T10:00:00Z",
        "1data-kafka-topic-name": "metrics",
        "1data-source-system": "Maestro"
    })
    .to_string()
}

/// `n` well-formed messages on partition 0 starting at offset 0
pub fn messages(n: usize) -> Vec<RawMessage> {
    (0..n)
        .map(|i| {
            RawMessage::new(
                "metrics",
                0,
                i as i64,
                event_json(&format!("edge-{:02}", i), "ifInOctets", i as i64),
            )
        })
        .collect()
}

/// Cache with a couple of mappings
pub fn cache() -> Arc<NormalizationCache> {
    Arc::new(NormalizationCache::from_entries([
        ("ifInOctets", "interface_in_octets"),
        ("cpuLoad", "cpu_utilization"),
    ]))
}

/// Pipeline wired to a scripted warehouse
pub struct Harness {
    pub pipeline: BatchPipeline,
    pub warehouse: Arc<ScriptedWarehouse>,
    pub metrics: Arc<PipelineMetrics>,
}

/// Build a pipeline with the default retry policy
pub fn harness(warehouse: Arc<ScriptedWarehouse>, dead_letter: Arc<dyn DeadLetterSink>) -> Harness {
    let metrics = Arc::new(PipelineMetrics::new().unwrap());
    let writer = BatchWriter::new(warehouse.clone(), RetryPolicy::default());
    let pipeline = BatchPipeline::new(cache(), writer, dead_letter, metrics.clone());
    Harness {
        pipeline,
        warehouse,
        metrics,
    }
}

/// In-memory dead-letter store and a sink writing to it
pub fn memory_sink() -> (Arc<InMemory>, Arc<dyn DeadLetterSink>) {
    let store = Arc::new(InMemory::new());
    let sink = Arc::new(ObjectStoreDeadLetterSink::new(store.clone(), "dlq"));
    (store, sink)
}
