//! 批处理系统的单元测试。
//! Unit tests for the batching system.

use super::window::WindowController;
use super::*;
use crate::config::AdaptiveWindowConfig;
use crate::remote::{Batch, OperationOutcome, RemoteClient};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::time::Duration;

/// A remote that answers each operation with `r:<id>`, so tests can verify
/// the positional demux end-to-end.
struct EchoRemote {
    calls: AtomicU64,
    failing: AtomicBool,
    batch_sizes: std::sync::Mutex<Vec<usize>>,
}

impl EchoRemote {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            batch_sizes: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteClient for EchoRemote {
    async fn submit_batch(&self, batch: &Batch) -> Result<Vec<OperationOutcome>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(batch.len());
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Remote("remote is down".to_string()));
        }
        Ok(batch
            .operations
            .iter()
            .map(|op| OperationOutcome::Success(Bytes::from(format!("r:{}", op.id))))
            .collect())
    }
}

fn fixed_window_config(window: Duration) -> Config {
    let mut config = Config::default();
    config.batching.adaptive_window = false;
    config.batching.window = window;
    config
}

fn op(id: &str) -> Operation {
    Operation::with_id(id, "update_cells", "sheet-1", Bytes::from_static(b"{}"))
}

#[tokio::test(start_paused = true)]
async fn test_fixed_window_coalesces_three_operations() {
    let remote = EchoRemote::new();
    let system = BatchingSystem::new(
        &fixed_window_config(Duration::from_millis(50)),
        remote.clone(),
    );

    // Three operations submitted at t=0, 10, 20 ms.
    let mut handles = Vec::new();
    for (i, delay) in [0u64, 10, 20].into_iter().enumerate() {
        let system = system.clone();
        handles.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            system.execute(op(&format!("op-{i}"))).await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let payload = handle.await.unwrap().unwrap();
        // 第K个操作必须收到第K个结果。
        assert_eq!(payload, Bytes::from(format!("r:op-{i}")));
    }

    assert_eq!(remote.calls(), 1);
    assert_eq!(*remote.batch_sizes.lock().unwrap(), vec![3]);

    let stats = system.stats();
    assert_eq!(stats.operations_submitted, 3);
    assert_eq!(stats.batches_dispatched, 1);
    assert_eq!(stats.remote_calls, 1);
    assert!((stats.avg_batch_size - 3.0).abs() < f64::EPSILON);
    assert!((stats.reduction_percentage - 66.666).abs() < 0.1);
}

#[tokio::test(start_paused = true)]
async fn test_demux_preserves_enqueue_order() {
    let remote = EchoRemote::new();
    let system = BatchingSystem::new(
        &fixed_window_config(Duration::from_millis(20)),
        remote.clone(),
    );

    let mut handles = Vec::new();
    for i in 0..10 {
        let system = system.clone();
        handles.push(tokio::spawn(
            async move { system.execute(op(&format!("op-{i}"))).await },
        ));
        // Keep enqueue order deterministic.
        tokio::task::yield_now().await;
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap(), Bytes::from(format!("r:op-{i}")));
    }
    assert_eq!(remote.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_per_item_failure_demuxes_individually() {
    /// Fails the second operation of every batch, succeeds the rest.
    struct MixedRemote;

    #[async_trait]
    impl RemoteClient for MixedRemote {
        async fn submit_batch(&self, batch: &Batch) -> Result<Vec<OperationOutcome>> {
            Ok(batch
                .operations
                .iter()
                .enumerate()
                .map(|(i, op)| {
                    if i == 1 {
                        OperationOutcome::Failure("cell is protected".to_string())
                    } else {
                        OperationOutcome::Success(Bytes::from(format!("r:{}", op.id)))
                    }
                })
                .collect())
        }
    }

    let system = BatchingSystem::new(
        &fixed_window_config(Duration::from_millis(20)),
        Arc::new(MixedRemote),
    );

    let mut handles = Vec::new();
    for i in 0..3 {
        let system = system.clone();
        handles.push(tokio::spawn(
            async move { system.execute(op(&format!("op-{i}"))).await },
        ));
        tokio::task::yield_now().await;
    }

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert!(results[0].is_ok());
    assert!(matches!(
        results[1].as_ref().unwrap_err(),
        Error::OperationFailed(reason) if reason == "cell is protected"
    ));
    assert!(results[2].is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_batch_failure_rejects_all_with_shared_cause() {
    let remote = EchoRemote::new();
    remote.set_failing(true);
    let system = BatchingSystem::new(
        &fixed_window_config(Duration::from_millis(20)),
        remote.clone(),
    );

    let mut handles = Vec::new();
    for i in 0..3 {
        let system = system.clone();
        handles.push(tokio::spawn(
            async move { system.execute(op(&format!("op-{i}"))).await },
        ));
        tokio::task::yield_now().await;
    }

    let mut causes = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Err(Error::Dispatch(cause)) => causes.push(cause),
            other => panic!("expected a dispatch error, got {other:?}"),
        }
    }

    // Every rejection references the same underlying cause.
    assert!(Arc::ptr_eq(&causes[0], &causes[1]));
    assert!(Arc::ptr_eq(&causes[1], &causes[2]));
    assert!(matches!(&*causes[0], Error::Remote(_)));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_pending_id_is_rejected_without_enqueue() {
    let remote = EchoRemote::new();
    let system = BatchingSystem::new(
        &fixed_window_config(Duration::from_millis(50)),
        remote.clone(),
    );

    let first = {
        let system = system.clone();
        tokio::spawn(async move { system.execute(op("dup")).await })
    };
    tokio::task::yield_now().await;

    let err = system.execute(op("dup")).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateOperation(id) if id == "dup"));

    // The first submission still settles normally.
    assert!(first.await.unwrap().is_ok());

    // Once it has settled, the id is free again.
    assert!(system.execute(op("dup")).await.is_ok());
    assert_eq!(remote.calls(), 2);
    // The rejected duplicate was never counted as submitted.
    assert_eq!(system.stats().operations_submitted, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_submission_frees_its_id() {
    let remote = EchoRemote::new();
    let mut config = fixed_window_config(Duration::from_millis(20));
    config.batching.command_channel_capacity = 1;
    let system = BatchingSystem::new(&config, remote.clone());

    // Fill the single command slot; "a" now waits for its result.
    let first = system.execute(op("a"));
    tokio::pin!(first);
    assert!(futures::poll!(first.as_mut()).is_pending());

    // "b" blocks on channel capacity mid-hand-off. Dropping it there must
    // release its id even though the actor never saw the operation.
    {
        let second = system.execute(op("b"));
        tokio::pin!(second);
        assert!(futures::poll!(second.as_mut()).is_pending());
    }

    first.await.unwrap();

    // "b" was never enqueued, so the id is free for a fresh submission.
    let payload = system.execute(op("b")).await.unwrap();
    assert_eq!(payload, Bytes::from("r:b"));
}

#[tokio::test(start_paused = true)]
async fn test_submissions_buffered_behind_shutdown_are_rejected() {
    let config = fixed_window_config(Duration::from_millis(20));
    let pending_ids = Arc::new(DashSet::new());
    let (command_tx, command_rx) = mpsc::channel(8);
    let actor = BatcherActor::new(
        command_rx,
        WindowController::new(&config.batching),
        pending_ids.clone(),
        Arc::new(BatchingMetrics::default()),
        ConcurrencyCoordinator::new(&config.concurrency),
        Arc::new(CircuitBreaker::new(&config.breaker)),
        EchoRemote::new(),
        false,
    );
    let actor_task = tokio::spawn(actor.run());

    // A submission can land behind a shutdown command in the channel when
    // its sender raced the shutdown flag. It must settle with the shutdown
    // error and release its id, not see a broken channel.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    command_tx
        .send(BatcherCommand::Shutdown {
            done_tx: shutdown_tx,
        })
        .await
        .unwrap();

    pending_ids.insert("late".to_string());
    let (response_tx, response_rx) = oneshot::channel();
    command_tx
        .send(BatcherCommand::Submit {
            operation: op("late"),
            response_tx,
        })
        .await
        .unwrap();

    shutdown_rx.await.unwrap();
    assert!(response_rx.await.unwrap().unwrap_err().is_shutdown());
    assert!(!pending_ids.contains("late"));
    actor_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_flush_bypasses_window_wait() {
    let remote = EchoRemote::new();
    let system = BatchingSystem::new(
        &fixed_window_config(Duration::from_secs(3600)),
        remote.clone(),
    );

    let caller = {
        let system = system.clone();
        tokio::spawn(async move { system.execute(op("a")).await })
    };
    tokio::task::yield_now().await;

    system.flush().await.unwrap();
    assert!(caller.await.unwrap().is_ok());
    assert_eq!(remote.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_flush_on_empty_queue_is_a_no_op() {
    let remote = EchoRemote::new();
    let system = BatchingSystem::new(
        &fixed_window_config(Duration::from_millis(20)),
        remote.clone(),
    );

    system.flush().await.unwrap();
    assert_eq!(remote.calls(), 0);
    assert_eq!(system.stats().batches_dispatched, 0);
}

#[tokio::test(start_paused = true)]
async fn test_flush_reports_batch_failure() {
    let remote = EchoRemote::new();
    remote.set_failing(true);
    let system = BatchingSystem::new(
        &fixed_window_config(Duration::from_secs(3600)),
        remote.clone(),
    );

    let caller = {
        let system = system.clone();
        tokio::spawn(async move { system.execute(op("a")).await })
    };
    tokio::task::yield_now().await;

    assert!(matches!(
        system.flush().await.unwrap_err(),
        Error::Dispatch(_)
    ));
    assert!(caller.await.unwrap().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_queued_operations() {
    let remote = EchoRemote::new();
    let system = BatchingSystem::new(
        &fixed_window_config(Duration::from_secs(3600)),
        remote.clone(),
    );

    let caller = {
        let system = system.clone();
        tokio::spawn(async move { system.execute(op("stranded")).await })
    };
    tokio::task::yield_now().await;

    system.shutdown().await.unwrap();
    // 排队中的操作以“正在关闭”错误落定。
    assert!(caller.await.unwrap().unwrap_err().is_shutdown());
    assert_eq!(remote.calls(), 0);

    // Shutdown is idempotent and later submissions are refused.
    system.shutdown().await.unwrap();
    assert!(system.execute(op("late")).await.unwrap_err().is_shutdown());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_dispatch() {
    /// A remote that takes 100 ms per call.
    struct SlowRemote {
        calls: AtomicU64,
    }

    #[async_trait]
    impl RemoteClient for SlowRemote {
        async fn submit_batch(&self, batch: &Batch) -> Result<Vec<OperationOutcome>> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(batch
                .operations
                .iter()
                .map(|_| OperationOutcome::Success(Bytes::new()))
                .collect())
        }
    }

    let remote = Arc::new(SlowRemote {
        calls: AtomicU64::new(0),
    });
    let system = BatchingSystem::new(
        &fixed_window_config(Duration::from_millis(10)),
        remote.clone(),
    );

    let caller = {
        let system = system.clone();
        tokio::spawn(async move { system.execute(op("a")).await })
    };
    // Let the window fire and the dispatch get in flight.
    tokio::time::sleep(Duration::from_millis(20)).await;

    system.shutdown().await.unwrap();
    // After shutdown returns, the in-flight batch has settled.
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    assert!(caller.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_stats_account_for_every_operation() {
    let remote = EchoRemote::new();
    let system = BatchingSystem::new(
        &fixed_window_config(Duration::from_millis(20)),
        remote.clone(),
    );

    // Two windows of two operations each.
    for round in 0..2 {
        let mut handles = Vec::new();
        for i in 0..2 {
            let system = system.clone();
            handles.push(tokio::spawn(async move {
                system.execute(op(&format!("op-{round}-{i}"))).await
            }));
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    let stats = system.stats();
    assert_eq!(stats.operations_submitted, 4);
    assert_eq!(stats.batches_dispatched, 2);
    let dispatched: usize = remote.batch_sizes.lock().unwrap().iter().sum();
    assert_eq!(dispatched as u64, stats.operations_submitted);
    assert!((stats.avg_batch_size - 2.0).abs() < f64::EPSILON);
    assert_eq!(stats.avg_window, Duration::from_millis(20));
}

// ---- window controller ----

fn adaptive_config(
    min: u64,
    max: u64,
    initial: u64,
    low: usize,
    high: usize,
) -> BatchingConfig {
    BatchingConfig {
        adaptive_window: true,
        window: Duration::from_millis(initial),
        adaptive: AdaptiveWindowConfig {
            min_window: Duration::from_millis(min),
            max_window: Duration::from_millis(max),
            initial_window: Duration::from_millis(initial),
            low_threshold: low,
            high_threshold: high,
        },
        verbose_logging: false,
        command_channel_capacity: 128,
    }
}

#[test]
fn test_window_grows_under_light_traffic() {
    let mut window = WindowController::new(&adaptive_config(20, 200, 50, 3, 50));
    assert_eq!(window.current(), Duration::from_millis(50));

    // Steady-low traffic converges toward the maximum.
    let mut last = window.current();
    for _ in 0..10 {
        let next = window.on_window_closed(1);
        assert!(next >= last);
        last = next;
    }
    assert_eq!(last, Duration::from_millis(200));
}

#[test]
fn test_window_shrinks_under_heavy_traffic() {
    let mut window = WindowController::new(&adaptive_config(20, 200, 200, 3, 50));

    let mut last = window.current();
    for _ in 0..10 {
        let next = window.on_window_closed(100);
        assert!(next <= last);
        last = next;
    }
    assert_eq!(last, Duration::from_millis(20));
}

#[test]
fn test_window_stable_inside_band() {
    let mut window = WindowController::new(&adaptive_config(20, 200, 50, 3, 50));
    assert_eq!(window.on_window_closed(10), Duration::from_millis(50));
    assert_eq!(window.on_window_closed(3), Duration::from_millis(50));
    assert_eq!(window.on_window_closed(50), Duration::from_millis(50));
}

#[test]
fn test_window_never_leaves_configured_bounds() {
    let mut window = WindowController::new(&adaptive_config(20, 200, 50, 3, 50));
    // Alternate extreme patterns; the clamp invariant must hold throughout.
    for i in 0..100 {
        let count = if i % 3 == 0 { 0 } else { 1000 };
        let next = window.on_window_closed(count);
        assert!(next >= Duration::from_millis(20));
        assert!(next <= Duration::from_millis(200));
    }
}

#[test]
fn test_fixed_mode_ignores_traffic() {
    let mut config = adaptive_config(20, 200, 50, 3, 50);
    config.adaptive_window = false;
    config.window = Duration::from_millis(75);

    let mut window = WindowController::new(&config);
    assert_eq!(window.on_window_closed(0), Duration::from_millis(75));
    assert_eq!(window.on_window_closed(1000), Duration::from_millis(75));
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_window_converges_upward_under_steady_low_traffic() {
    let remote = EchoRemote::new();
    let mut config = Config::default();
    config.batching.adaptive_window = true;
    config.batching.adaptive = AdaptiveWindowConfig {
        min_window: Duration::from_millis(20),
        max_window: Duration::from_millis(200),
        initial_window: Duration::from_millis(50),
        low_threshold: 3,
        high_threshold: 50,
    };
    let system = BatchingSystem::new(&config, remote.clone());

    // About one operation per 100 ms: every window closes undersubscribed.
    for i in 0..12 {
        let system = system.clone();
        let caller = tokio::spawn(async move { system.execute(op(&format!("op-{i}"))).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        caller.await.unwrap().unwrap();
    }

    let stats = system.stats();
    assert_eq!(stats.current_window, Duration::from_millis(200));
    assert!(stats.avg_window > Duration::from_millis(50));
}
