//! 集成测试共享的辅助工具。
//! Shared helpers for the integration tests.

// Each test binary compiles this module separately and uses a subset of it.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use gridpipe::error::{Error, Result};
use gridpipe::remote::{Batch, Operation, OperationOutcome, RemoteClient};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::time::Duration;

/// Initializes a test tracing subscriber once. Controlled via `RUST_LOG`.
/// 初始化一次测试用的tracing订阅器。通过 `RUST_LOG` 控制。
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds an operation with a fixed id against a well-known target.
/// 构建一个作用于已知目标、带固定id的操作。
pub fn op(id: &str) -> Operation {
    Operation::with_id(id, "update_cells", "sheet-1", Bytes::from_static(b"{}"))
}

/// A scripted remote: optionally slow, optionally failing for the first N
/// calls, always recording call counts and peak concurrency.
///
/// 一个按脚本行为的远程端：可配置延迟、可让前N次调用失败，并始终记录调用
/// 次数和并发峰值。
pub struct ScriptedRemote {
    pub calls: AtomicU64,
    pub failures_remaining: AtomicU64,
    pub delay: Duration,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            failures_remaining: AtomicU64::new(0),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    #[allow(dead_code)]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// Makes the next `n` calls fail with a batch-level error.
    /// 使接下来的 `n` 次调用以批次级错误失败。
    #[allow(dead_code)]
    pub fn fail_next(&self, n: u64) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    async fn submit_batch(&self, batch: &Batch) -> Result<Vec<OperationOutcome>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut failures = self.failures_remaining.load(Ordering::SeqCst);
        while failures > 0 {
            match self.failures_remaining.compare_exchange(
                failures,
                failures - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(Error::Remote("quota exhausted".to_string())),
                Err(actual) => failures = actual,
            }
        }

        Ok(batch
            .operations
            .iter()
            .map(|op| OperationOutcome::Success(Bytes::from(format!("r:{}", op.id))))
            .collect())
    }
}
