//! 限制同时在途远程调用数量的并发准入协调器。
//! The concurrency admission coordinator that bounds in-flight remote calls.
//!
//! The remote API is quota-limited; exceeding its rate limits causes
//! self-inflicted throttling. The coordinator caps the number of
//! simultaneous outbound calls at a configured ceiling and serves waiters
//! in FIFO order, so no dispatch starves under sustained load.
//!
//! 远程API受配额限制；超过其速率限制会导致自找的节流。协调器将同时出站的
//! 调用数量限制在配置的上限内，并按FIFO顺序服务等待者，因此在持续负载下
//! 没有派发会被饿死。

use crate::{config::ConcurrencyConfig, error::{Error, Result}};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Bounds the number of outstanding remote calls to a configured ceiling.
///
/// Cloning is cheap; all clones share the same slot pool.
///
/// 将在途远程调用的数量限制在配置的上限内。
///
/// 克隆的开销很低；所有克隆共享同一个槽位池。
#[derive(Debug, Clone)]
pub struct ConcurrencyCoordinator {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
}

/// An acquired concurrency slot. The slot is returned to the pool when the
/// guard is dropped, on every exit path including panics of the wrapped call.
///
/// 已获取的并发槽位。当守卫被drop时，槽位归还到池中，包括被包装调用panic
/// 在内的所有退出路径都是如此。
#[derive(Debug)]
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyCoordinator {
    /// Creates a coordinator with the configured ceiling.
    ///
    /// 以配置的上限创建协调器。
    pub fn new(config: &ConcurrencyConfig) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            max_concurrent: config.max_concurrent,
        }
    }

    /// Suspends the caller until a slot is available, then returns its
    /// guard. Waiters are served in the order they called `acquire`.
    ///
    /// 挂起调用方直到有槽位可用，然后返回其守卫。等待者按调用 `acquire`
    /// 的顺序被服务。
    pub async fn acquire(&self) -> Result<SlotGuard> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ShuttingDown)?;
        trace!(
            available = self.slots.available_permits(),
            max = self.max_concurrent,
            "concurrency slot acquired"
        );
        Ok(SlotGuard { _permit: permit })
    }

    /// The configured ceiling.
    /// 配置的上限。
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// The number of slots currently free.
    /// 当前空闲的槽位数量。
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}
