//! 批处理系统的无锁运行统计。
//! Lock-free running statistics for the batching system.
//!
//! Outside observers read these concurrently with internal mutation, so
//! the counters are plain atomics and every read produces an independent
//! snapshot. Derived values (average batch size, reduction percentage) are
//! computed at snapshot time, never stored.
//!
//! 外部观察者与内部修改并发地读取这些统计，因此计数器是普通的原子变量，
//! 每次读取都产生独立的快照。派生值（平均批次大小、缩减百分比）在快照时
//! 计算，从不存储。

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Duration;

/// A point-in-time snapshot of batching activity.
///
/// 批处理活动的某一时刻快照。
#[derive(Debug, Clone, PartialEq)]
pub struct BatchingStats {
    /// Total operations submitted.
    /// 提交的操作总数。
    pub operations_submitted: u64,
    /// Total batches dispatched.
    /// 派发的批次总数。
    pub batches_dispatched: u64,
    /// Remote calls actually attempted. Falls behind `batches_dispatched`
    /// when the circuit breaker short-circuits a dispatch.
    /// 实际尝试的远程调用总数。熔断器短路派发时会少于 `batches_dispatched`。
    pub remote_calls: u64,
    /// Operations per batch, averaged over all dispatched batches.
    /// 所有已派发批次的平均每批操作数。
    pub avg_batch_size: f64,
    /// How many round trips batching saved, as `(1 - calls/operations) × 100`,
    /// clamped to `[0, 100]`.
    /// 批处理节省的往返比例，计算为 `(1 - 调用数/操作数) × 100`，截断到 `[0, 100]`。
    pub reduction_percentage: f64,
    /// The window duration the next batch will use.
    /// 下一个批次将使用的窗口时长。
    pub current_window: Duration,
    /// Lifetime average window duration across dispatched batches.
    /// 已派发批次的窗口时长的全程平均值。
    pub avg_window: Duration,
}

/// The mutable counters behind [`BatchingStats`].
#[derive(Debug, Default)]
pub(crate) struct BatchingMetrics {
    operations_submitted: AtomicU64,
    batches_dispatched: AtomicU64,
    remote_calls: AtomicU64,
    current_window_ms: AtomicU64,
    window_ms_total: AtomicU64,
}

impl BatchingMetrics {
    pub(crate) fn record_submitted(&self) {
        self.operations_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one dispatched batch and the window duration that produced it.
    /// 记录一个已派发的批次及产生它的窗口时长。
    pub(crate) fn record_batch(&self, window: Duration) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.window_ms_total
            .fetch_add(window.as_millis() as u64, Ordering::Relaxed);
    }

    /// Records one call actually reaching the remote. Dispatches
    /// short-circuited by an open breaker never get here.
    /// 记录一次实际触达远程端的调用。被打开的熔断器短路的派发不会走到这里。
    pub(crate) fn record_remote_call(&self) {
        self.remote_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_current_window(&self, window: Duration) {
        self.current_window_ms
            .store(window.as_millis() as u64, Ordering::Relaxed);
    }

    /// Produces a consistent-enough snapshot for reporting. Counters are
    /// read individually; the derived ratios are computed from the values
    /// read, so they are always internally coherent.
    ///
    /// 产生用于报告的快照。计数器逐个读取；派生比率由读取到的值计算，
    /// 因此始终内部一致。
    pub(crate) fn snapshot(&self) -> BatchingStats {
        let operations = self.operations_submitted.load(Ordering::Relaxed);
        let batches = self.batches_dispatched.load(Ordering::Relaxed);
        let calls = self.remote_calls.load(Ordering::Relaxed);
        let window_ms_total = self.window_ms_total.load(Ordering::Relaxed);

        let avg_batch_size = if batches == 0 {
            0.0
        } else {
            operations as f64 / batches as f64
        };
        let reduction_percentage = if operations == 0 {
            0.0
        } else {
            ((1.0 - calls as f64 / operations as f64) * 100.0).clamp(0.0, 100.0)
        };
        let avg_window = if batches == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(window_ms_total / batches)
        };

        BatchingStats {
            operations_submitted: operations,
            batches_dispatched: batches,
            remote_calls: calls,
            avg_batch_size,
            reduction_percentage,
            current_window: Duration::from_millis(
                self.current_window_ms.load(Ordering::Relaxed),
            ),
            avg_window,
        }
    }
}
