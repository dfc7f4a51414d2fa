mod common;

use common::{harness, memory_sink, messages, ScriptedWarehouse};
use metric_ingest::consumer::{
    join_workers, MemorySource, PipelineControl, PipelineRunner, PipelineStatus,
};
use std::sync::Arc;
use std::time::Duration;

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_start_stop_and_shutdown() {
    let (_, sink) = memory_sink();
    let h = harness(ScriptedWarehouse::new(vec![]), sink);
    let control = Arc::new(PipelineControl::new(h.metrics.clone(), false));

    let sources: Vec<MemorySource> = (0..2)
        .map(|_| MemorySource::new(Duration::from_millis(5)))
        .collect();
    let feeders: Vec<_> = sources.iter().map(|s| s.feeder()).collect();
    let logs: Vec<_> = sources.iter().map(|s| s.ack_log()).collect();
    let acked = || logs.iter().map(|l| l.count()).sum::<usize>();

    let handles = PipelineRunner::new(sources, Arc::new(h.pipeline), control.clone())
        .with_error_backoff(Duration::from_millis(5))
        .spawn();

    feeders[0].push(messages(3));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        control.status(),
        PipelineStatus {
            running: false,
            consumed: 0,
            pushed: 0
        }
    );
    assert_eq!(feeders[0].pending(), 1);

    control.start();
    assert!(wait_until(|| acked() == 1).await);
    assert!(control.status().running);
    assert!(wait_until(|| control.active_workers() == 2).await);

    feeders[1].push(messages(2));
    assert!(wait_until(|| acked() == 2).await);
    let status = control.status();
    assert_eq!(status.consumed, 5);
    assert_eq!(status.pushed, 5);

    control.stop();
    assert!(wait_until(|| !control.status().running).await);

    feeders[1].push(messages(4));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(acked(), 2);
    assert_eq!(feeders[1].pending(), 1);

    control.start();
    assert!(wait_until(|| acked() == 3).await);
    assert_eq!(control.status().pushed, 9);

    control.shutdown();
    assert!(control.wait_for_idle(Duration::from_secs(1)).await.is_ok());
    assert_eq!(join_workers(handles, Duration::from_secs(2)).await, 2);
    assert!(!control.status().running);
    assert_eq!(control.active_workers(), 0);
}

#[tokio::test]
async fn test_batch_in_flight_completes_after_stop() {
    let (_, sink) = memory_sink();
    let h = harness(ScriptedWarehouse::new(vec![]), sink);
    let control = Arc::new(PipelineControl::new(h.metrics.clone(), true));

    let source = MemorySource::new(Duration::from_millis(5));
    source.push(messages(10));
    let log = source.ack_log();

    let handles = PipelineRunner::new(vec![source], Arc::new(h.pipeline), control.clone()).spawn();
    control.stop();

    control.shutdown();
    join_workers(handles, Duration::from_secs(2)).await;

    // Pulled and fully handled, or never pulled
    let pushed = control.status().pushed;
    assert!(pushed == 0 || pushed == 10);
    assert_eq!(log.count(), usize::from(pushed == 10));
}
