//! 自适应批处理系统：将许多小操作合并为更少的远程往返。
//! The adaptive batching system: coalesces many small operations into fewer
//! remote round trips.
//!
//! Callers submit individual [`Operation`](crate::remote::Operation)s via
//! [`BatchingSystem::execute`] and each receives its own result. Internally
//! the operations accumulate during a time window; when the window closes
//! the queue is drained into one [`Batch`](crate::remote::Batch), dispatched
//! through the concurrency coordinator and a circuit-breaker-wrapped remote
//! call, and the response is demultiplexed back to each waiting caller in
//! enqueue order.
//!
//! 调用方通过 [`BatchingSystem::execute`] 提交单个操作，并各自收到自己的
//! 结果。内部实现中，操作在一个时间窗口内积累；窗口关闭时队列被排空为一个
//! 批次，经由并发协调器和熔断器包装的远程调用派发，响应再按入队顺序解复用
//! 回各个等待的调用方。

mod actor;
mod command;
mod stats;
mod window;

#[cfg(test)]
mod tests;

pub use stats::BatchingStats;

use crate::{
    batch::{actor::BatcherActor, command::BatcherCommand, stats::BatchingMetrics, window::WindowController},
    breaker::CircuitBreaker,
    config::{BatchingConfig, Config},
    error::{Error, Result},
    limiter::ConcurrencyCoordinator,
    remote::{Operation, OperationOutcome, RemoteClient},
};
use bytes::Bytes;
use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// The public handle to the batching pipeline.
///
/// Cloning is cheap; all clones talk to the same actor. The handle is safe
/// to use from many concurrent callers.
///
/// 批处理管线的公共句柄。
///
/// 克隆开销很低；所有克隆与同一个actor通信。该句柄可被许多并发调用方安全使用。
#[derive(Debug, Clone)]
pub struct BatchingSystem {
    command_tx: mpsc::Sender<BatcherCommand>,
    pending_ids: Arc<DashSet<String>>,
    metrics: Arc<BatchingMetrics>,
    breaker: Arc<CircuitBreaker<Vec<OperationOutcome>>>,
    shutdown: Arc<AtomicBool>,
}

impl BatchingSystem {
    /// Builds the full pipeline from one [`Config`]: the batching actor,
    /// a fresh concurrency coordinator, and a fresh circuit breaker.
    ///
    /// 从一个 [`Config`] 构建完整管线：批处理actor、新的并发协调器和新的熔断器。
    pub fn new(config: &Config, remote: Arc<dyn RemoteClient>) -> Self {
        let limiter = ConcurrencyCoordinator::new(&config.concurrency);
        let breaker = Arc::new(CircuitBreaker::new(&config.breaker));
        Self::with_parts(&config.batching, remote, limiter, breaker)
    }

    /// Builds the batching system around externally constructed parts, so
    /// a coordinator or breaker can be shared with other pipelines.
    ///
    /// 围绕外部构建的部件组装批处理系统，使协调器或熔断器可以与其他管线共享。
    pub fn with_parts(
        config: &BatchingConfig,
        remote: Arc<dyn RemoteClient>,
        limiter: ConcurrencyCoordinator,
        breaker: Arc<CircuitBreaker<Vec<OperationOutcome>>>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_channel_capacity);
        let pending_ids = Arc::new(DashSet::new());
        let metrics = Arc::new(BatchingMetrics::default());

        let window = WindowController::new(config);
        metrics.set_current_window(window.current());

        let actor = BatcherActor::new(
            command_rx,
            window,
            pending_ids.clone(),
            metrics.clone(),
            limiter,
            breaker.clone(),
            remote,
            config.verbose_logging,
        );
        tokio::spawn(actor.run());

        Self {
            command_tx,
            pending_ids,
            metrics,
            breaker,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Submits one operation and suspends until its individual result is
    /// available, i.e. until its batch has been dispatched and demultiplexed.
    ///
    /// An operation whose id matches one still pending is a caller error
    /// and is rejected immediately without being enqueued.
    ///
    /// 提交一个操作并挂起，直到其单独的结果可用，即其所在批次已被派发并解
    /// 复用。
    ///
    /// 操作id与仍在等待的操作重复属于调用方错误，会被立即拒绝而不入队。
    pub async fn execute(&self, operation: Operation) -> Result<Bytes> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if !self.pending_ids.insert(operation.id.clone()) {
            return Err(Error::DuplicateOperation(operation.id));
        }
        // The id stays reserved only while the hand-off to the actor is
        // still in this caller's hands. Once the actor holds the operation,
        // it owns the removal.
        let mut reservation = PendingIdReservation {
            ids: &self.pending_ids,
            id: Some(operation.id.clone()),
        };

        let (response_tx, response_rx) = oneshot::channel();
        if self
            .command_tx
            .send(BatcherCommand::Submit {
                operation,
                response_tx,
            })
            .await
            .is_err()
        {
            return Err(Error::ShuttingDown);
        }
        reservation.id = None;

        response_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Forces an immediate drain and dispatch of whatever is queued,
    /// bypassing the remaining window wait. Resolves once the forced
    /// dispatch settles, with the batch-level outcome.
    ///
    /// 强制立即排空并派发当前队列中的内容，跳过剩余的窗口等待。强制派发落
    /// 定后完成，并携带批次级结果。
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .command_tx
            .send(BatcherCommand::Flush { done_tx })
            .await
            .is_err()
        {
            return Err(Error::ShuttingDown);
        }
        done_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// A read-only snapshot of the running statistics. Cheap and
    /// non-blocking; safe to call from metrics endpoints.
    ///
    /// 运行统计的只读快照。开销低且不阻塞；可安全地从指标端点调用。
    pub fn stats(&self) -> BatchingStats {
        self.metrics.snapshot()
    }

    /// The circuit breaker protecting this pipeline's remote calls, for
    /// fallback registration and registry reporting.
    ///
    /// 保护此管线远程调用的熔断器，用于注册回退处理器和注册表报告。
    pub fn breaker(&self) -> &Arc<CircuitBreaker<Vec<OperationOutcome>>> {
        &self.breaker
    }

    /// Shuts the pipeline down. Operations still queued are rejected with
    /// [`Error::ShuttingDown`]; callers that need them dispatched should
    /// call [`flush`](Self::flush) first. After this returns, no timer is
    /// armed and every pending future has settled. Idempotent.
    ///
    /// 关闭管线。仍在排队的操作将被以 [`Error::ShuttingDown`] 拒绝；需要
    /// 派发它们的调用方应先调用 [`flush`](Self::flush)。返回后不再有定时器
    /// 在运行，且每个等待中的future都已落定。幂等。
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .command_tx
            .send(BatcherCommand::Shutdown { done_tx })
            .await
            .is_err()
        {
            // The actor is already gone; nothing left to settle.
            return Ok(());
        }
        let _ = done_rx.await;
        Ok(())
    }
}

/// Holds an operation id's slot in the pending set during the hand-off to
/// the actor. If the submitting future is dropped (or the send fails)
/// before the actor has the operation, the drop frees the id so it can be
/// submitted again.
///
/// 在移交给actor期间占住操作id在pending集合中的槽位。如果提交中的future在
/// actor拿到操作之前被drop（或发送失败），drop会释放该id，使其可以再次提交。
struct PendingIdReservation<'a> {
    ids: &'a DashSet<String>,
    id: Option<String>,
}

impl Drop for PendingIdReservation<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.ids.remove(&id);
        }
    }
}
