mod common;

use common::{event_json, harness, memory_sink, messages, Reply, ScriptedWarehouse};
use futures::TryStreamExt;
use metric_ingest::consumer::{
    Batch, BatchProcessor, BatchSource, BatchState, DisabledDeadLetterSink, MemorySource,
    ObjectStoreDeadLetterSink,
};
use metric_ingest::event::RawMessage;
use object_store::{local::LocalFileSystem, path::Path, ObjectStore};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

async fn pull(source: &mut MemorySource) -> Batch {
    source.next_batch().await.unwrap().unwrap()
}

#[tokio::test]
async fn test_malformed_message_is_dropped_and_batch_acknowledged() {
    let (_, sink) = memory_sink();
    let h = harness(ScriptedWarehouse::new(vec![]), sink);

    let mut batch = messages(5);
    batch[3] = RawMessage::new("metrics", 0, 3, "{\"parameter_name\": ");

    let mut source = MemorySource::new(Duration::from_millis(1));
    source.push(batch);
    let log = source.ack_log();

    let report = h.pipeline.process_batch(pull(&mut source).await).await;

    assert_eq!(report.received, 5);
    assert_eq!(report.parsed, 4);
    assert_eq!(report.parse_failures, 1);
    assert_eq!(report.written, 4);
    assert_eq!(report.outcome, BatchState::Written);
    assert_eq!(report.state, BatchState::Acknowledged);
    assert!(report.acknowledged);
    assert_eq!(log.batches(), vec![vec![0, 1, 2, 3, 4]]);

    let submissions = h.warehouse.submissions();
    assert_eq!(submissions.len(), 1);
    let devices: Vec<_> = submissions[0]
        .iter()
        .map(|r| r.content.device_name.clone().unwrap())
        .collect();
    assert_eq!(devices, vec!["edge-00", "edge-01", "edge-02", "edge-04"]);
    assert!(submissions[0]
        .iter()
        .all(|r| r.content.metric_type == "interface_in_octets"
            && r.content.source_metric_type == "ifInOctets"));

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.consumed, 5);
    assert_eq!(snapshot.parse_failures, 1);
    assert_eq!(snapshot.pushed, 4);
    assert_eq!(snapshot.batches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_only_rejected_rows_are_resubmitted() {
    let (store, sink) = memory_sink();
    let h = harness(ScriptedWarehouse::new(vec![Reply::Reject(vec![2, 7])]), sink);
    let batch = messages(10);

    let started = Instant::now();
    let report = h.pipeline.process(&batch).await;

    assert_eq!(started.elapsed(), Duration::from_millis(200));
    assert_eq!(report.written, 10);
    assert_eq!(report.write_attempts, 2);
    assert_eq!(report.outcome, BatchState::Written);

    let ids = h.warehouse.submitted_ids();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[1], vec![ids[0][2].clone(), ids[0][7].clone()]);

    let objects: Vec<_> = store.list(None).try_collect().await.unwrap();
    assert!(objects.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_rows_are_quarantined() {
    let (store, sink) = memory_sink();
    let h = harness(ScriptedWarehouse::always(Reply::RejectAll), sink);
    let batch = messages(3);

    let started = Instant::now();
    let report = h.pipeline.process(&batch).await;

    assert_eq!(started.elapsed(), Duration::from_millis(1400));
    assert_eq!(report.write_attempts, 4);
    assert_eq!(report.written, 0);
    assert_eq!(report.quarantined, 3);
    assert_eq!(report.outcome, BatchState::Quarantined);
    assert_eq!(h.warehouse.submissions().len(), 4);

    let objects: Vec<_> = store.list(None).try_collect().await.unwrap();
    assert_eq!(objects.len(), 1);
    let location = objects[0].location.to_string();
    assert!(location.starts_with("dlq/failed_"));

    let body = store
        .get(&Path::from(location.as_str()))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["device_name"], "edge-00");
    assert_eq!(lines[0]["collection_interval"], "60m");
    assert_eq!(lines[0]["event_epoch"], 1709287200);

    assert_eq!(h.metrics.snapshot().quarantined, 3);
    assert_eq!(h.metrics.snapshot().pushed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_sink_reports_loss_and_still_acknowledges() {
    let h = harness(
        ScriptedWarehouse::always(Reply::Fail),
        Arc::new(DisabledDeadLetterSink),
    );

    let mut source = MemorySource::new(Duration::from_millis(1));
    source.push(messages(2));
    let log = source.ack_log();

    let report = h.pipeline.process_batch(pull(&mut source).await).await;

    assert_eq!(report.lost, 2);
    assert_eq!(report.outcome, BatchState::Lost);
    assert!(report.acknowledged);
    assert_eq!(log.count(), 1);
    assert_eq!(h.metrics.snapshot().lost, 2);
    assert_eq!(h.metrics.error_count("quarantine"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_reports_loss_and_still_acknowledges() {
    let root = tempfile::NamedTempFile::new().unwrap();
    let store = LocalFileSystem::new_with_prefix(root.path()).unwrap();
    let h = harness(
        ScriptedWarehouse::always(Reply::RejectAll),
        Arc::new(ObjectStoreDeadLetterSink::new(Arc::new(store), "dlq")),
    );

    let mut source = MemorySource::new(Duration::from_millis(1));
    source.push(messages(3));
    let log = source.ack_log();

    let report = h.pipeline.process_batch(pull(&mut source).await).await;

    assert_eq!(report.quarantined, 0);
    assert_eq!(report.lost, 3);
    assert_eq!(report.outcome, BatchState::Lost);
    assert!(report.acknowledged);
    assert_eq!(log.count(), 1);
    assert_eq!(h.metrics.snapshot().lost, 3);
    assert_eq!(h.metrics.error_count("quarantine"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_chunk_does_not_stop_later_chunks() {
    let (store, sink) = memory_sink();
    let warehouse = ScriptedWarehouse::new(vec![Reply::Fail; 4]);
    let mut h = harness(warehouse, sink);
    h.pipeline = h.pipeline.with_chunk_size(2);

    let report = h.pipeline.process(&messages(5)).await;

    assert_eq!(report.chunks, 3);
    assert_eq!(report.quarantined, 2);
    assert_eq!(report.written, 3);
    assert_eq!(report.write_attempts, 6);
    assert_eq!(report.outcome, BatchState::Quarantined);

    let sizes: Vec<usize> = h.warehouse.submissions().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 2, 2, 2, 1]);

    let objects: Vec<_> = store.list(None).try_collect().await.unwrap();
    assert_eq!(objects.len(), 1);
}

#[tokio::test]
async fn test_empty_batch_is_acknowledged_without_writes() {
    let (_, sink) = memory_sink();
    let h = harness(ScriptedWarehouse::new(vec![]), sink);

    let mut source = MemorySource::new(Duration::from_millis(1));
    source.push(Vec::new());
    let log = source.ack_log();

    let report = h.pipeline.process_batch(pull(&mut source).await).await;

    assert_eq!(report.outcome, BatchState::Written);
    assert_eq!(report.write_attempts, 0);
    assert!(report.acknowledged);
    assert_eq!(log.count(), 1);
    assert!(h.warehouse.submissions().is_empty());
}

#[tokio::test]
async fn test_all_malformed_batch_is_acknowledged() {
    let (_, sink) = memory_sink();
    let h = harness(ScriptedWarehouse::new(vec![]), sink);

    let report = h
        .pipeline
        .process(&[
            RawMessage::new("metrics", 1, 0, "not json"),
            RawMessage::new("metrics", 1, 1, "{\"device_name\": \"edge-01\"}"),
        ])
        .await;

    assert_eq!(report.parse_failures, 2);
    assert_eq!(report.outcome, BatchState::Written);
    assert!(h.warehouse.submissions().is_empty());
}

#[tokio::test]
async fn test_redelivered_batch_reuses_insert_ids() {
    let (_, sink) = memory_sink();
    let h = harness(ScriptedWarehouse::new(vec![]), sink);
    let batch = vec![
        RawMessage::new("metrics", 0, 7, event_json("edge-01", "cpuLoad", 42)),
        RawMessage::new("metrics", 0, 8, event_json("edge-02", "cpuLoad", 42)),
    ];

    h.pipeline.process(&batch).await;
    h.pipeline.process(&batch).await;

    let ids = h.warehouse.submitted_ids();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ids[1]);
    assert_ne!(ids[0][0], ids[0][1]);
    assert_eq!(
        h.warehouse.submissions()[0][0].content.metric_type,
        "cpu_utilization"
    );
}
