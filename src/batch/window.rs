//! 根据观察到的流量调节批处理窗口时长的控制环。
//! The control loop that adapts the batching window to observed traffic.
//!
//! The controller works like a latency/throughput band: after each window
//! closes, the number of operations it collected is compared against a low
//! and a high threshold. Below the band the window is too small to
//! amortize dispatch overhead and is lengthened; above the band it is
//! oversubscribed and is shortened, trading batch size for per-operation
//! latency. Inside the band the window is left alone.
//!
//! 控制器的工作方式类似一个延迟/吞吐带：每个窗口关闭后，将其收集到的操作
//! 数与低、高两个阈值比较。低于该带说明窗口太小，不足以摊销派发开销，
//! 于是拉长窗口；高于该带说明窗口过载，于是缩短窗口，用批次大小换取
//! 单个操作的延迟。处于带内则保持不变。

use crate::config::BatchingConfig;
use tokio::time::Duration;
use tracing::trace;

/// Owns the current window duration and its adaptation bounds.
///
/// Invariant: `min_window ≤ current ≤ max_window` after every adjustment.
///
/// 持有当前窗口时长及其调节边界。
///
/// 不变式：每次调整后都满足 `min_window ≤ current ≤ max_window`。
#[derive(Debug)]
pub(crate) struct WindowController {
    adaptive: bool,
    current: Duration,
    min_window: Duration,
    max_window: Duration,
    low_threshold: usize,
    high_threshold: usize,
}

impl WindowController {
    pub(crate) fn new(config: &BatchingConfig) -> Self {
        let adaptive = config.adaptive_window;
        let current = if adaptive {
            config
                .adaptive
                .initial_window
                .clamp(config.adaptive.min_window, config.adaptive.max_window)
        } else {
            config.window
        };
        Self {
            adaptive,
            current,
            min_window: config.adaptive.min_window,
            max_window: config.adaptive.max_window,
            low_threshold: config.adaptive.low_threshold,
            high_threshold: config.adaptive.high_threshold,
        }
    }

    /// The duration the next window will wait before dispatching.
    /// 下一个窗口在派发前等待的时长。
    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    /// Feeds the size of a just-closed window into the control loop and
    /// returns the (possibly adjusted) duration for the next window.
    ///
    /// 将刚关闭窗口的大小输入控制环，返回下一个窗口（可能已调整）的时长。
    pub(crate) fn on_window_closed(&mut self, operation_count: usize) -> Duration {
        if !self.adaptive {
            return self.current;
        }

        if operation_count < self.low_threshold {
            let grown = (self.current * 3 / 2).clamp(self.min_window, self.max_window);
            if grown != self.current {
                trace!(
                    count = operation_count,
                    low = self.low_threshold,
                    window = ?grown,
                    "window undersubscribed, lengthening"
                );
            }
            self.current = grown;
        } else if operation_count > self.high_threshold {
            let shrunk = (self.current / 2).clamp(self.min_window, self.max_window);
            if shrunk != self.current {
                trace!(
                    count = operation_count,
                    high = self.high_threshold,
                    window = ?shrunk,
                    "window oversubscribed, shortening"
                );
            }
            self.current = shrunk;
        } else {
            trace!(count = operation_count, window = ?self.current, "window stable");
        }

        debug_assert!(self.current >= self.min_window && self.current <= self.max_window);
        self.current
    }
}
