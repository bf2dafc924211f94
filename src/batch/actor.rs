//! 拥有操作队列和窗口定时器的单写者事件循环。
//! The single-owner event loop that owns the operation queue and window timer.
//!
//! All queue mutation and timer rearming happens on this one task, so the
//! window timer firing and an explicit flush can never both drain the same
//! queue contents: whichever the `select!` picks performs the drain, and
//! the other sees an empty queue.
//!
//! 所有队列修改和定时器重置都发生在这一个任务上，因此窗口定时器触发和显式
//! flush永远不会同时排空相同的队列内容：`select!` 选中的那一方执行排空，
//! 另一方看到的是空队列。

use crate::{
    batch::command::BatcherCommand,
    batch::stats::BatchingMetrics,
    batch::window::WindowController,
    breaker::CircuitBreaker,
    error::{Error, Result},
    limiter::ConcurrencyCoordinator,
    remote::{Batch, Operation, OperationOutcome, RemoteClient},
};
use bytes::Bytes;
use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Why a drain was performed, for logging.
/// 执行排空的原因，用于日志。
#[derive(Debug, Clone, Copy)]
enum DrainReason {
    WindowElapsed,
    Flush,
}

pub(crate) struct BatcherActor {
    command_rx: mpsc::Receiver<BatcherCommand>,
    /// Operations collected in the current window, in enqueue order,
    /// paired with the sender that resolves each caller's future.
    /// 当前窗口内按入队顺序收集的操作，以及完成各调用方future的发送端。
    queue: Vec<(Operation, oneshot::Sender<Result<Bytes>>)>,
    window: WindowController,
    window_deadline: Option<Instant>,
    window_opened_at: Option<Instant>,
    pending_ids: Arc<DashSet<String>>,
    metrics: Arc<BatchingMetrics>,
    limiter: ConcurrencyCoordinator,
    breaker: Arc<CircuitBreaker<Vec<OperationOutcome>>>,
    remote: Arc<dyn RemoteClient>,
    /// In-flight dispatch tasks; shutdown waits for all of them.
    /// 在途的派发任务；关闭时等待它们全部完成。
    dispatches: JoinSet<()>,
    verbose: bool,
}

impl BatcherActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        command_rx: mpsc::Receiver<BatcherCommand>,
        window: WindowController,
        pending_ids: Arc<DashSet<String>>,
        metrics: Arc<BatchingMetrics>,
        limiter: ConcurrencyCoordinator,
        breaker: Arc<CircuitBreaker<Vec<OperationOutcome>>>,
        remote: Arc<dyn RemoteClient>,
        verbose: bool,
    ) -> Self {
        Self {
            command_rx,
            queue: Vec::new(),
            window,
            window_deadline: None,
            window_opened_at: None,
            pending_ids,
            metrics,
            limiter,
            breaker,
            remote,
            dispatches: JoinSet::new(),
            verbose,
        }
    }

    /// The actor's main loop. Runs until a shutdown command arrives or
    /// every handle is dropped.
    ///
    /// actor的主循环。运行直到收到关闭命令或所有句柄被drop。
    pub(crate) async fn run(mut self) {
        debug!("batching actor started");
        loop {
            let deadline = self.window_deadline;
            tokio::select! {
                maybe_cmd = self.command_rx.recv() => match maybe_cmd {
                    Some(BatcherCommand::Submit { operation, response_tx }) => {
                        self.enqueue(operation, response_tx);
                    }
                    Some(BatcherCommand::Flush { done_tx }) => {
                        self.drain(DrainReason::Flush, Some(done_tx));
                    }
                    Some(BatcherCommand::Shutdown { done_tx }) => {
                        self.shutdown().await;
                        let _ = done_tx.send(());
                        break;
                    }
                    None => {
                        // Every handle dropped without an explicit shutdown.
                        self.shutdown().await;
                        break;
                    }
                },
                _ = window_wait(deadline) => {
                    self.drain(DrainReason::WindowElapsed, None);
                }
                // Reap finished dispatch tasks as they complete.
                Some(_) = self.dispatches.join_next() => {}
            }
        }
        debug!("batching actor stopped");
    }

    /// Adds one operation to the queue, opening a new window if none is
    /// running.
    ///
    /// 将一个操作加入队列，如果没有正在运行的窗口则打开一个新窗口。
    fn enqueue(&mut self, operation: Operation, response_tx: oneshot::Sender<Result<Bytes>>) {
        let now = Instant::now();
        if self.queue.is_empty() {
            let window = self.window.current();
            self.window_opened_at = Some(now);
            self.window_deadline = Some(now + window);
            trace!(window = ?window, "window opened");
        }
        self.metrics.record_submitted();
        trace!(
            id = %operation.id,
            kind = %operation.kind,
            target = %operation.target,
            queued = self.queue.len() + 1,
            "operation enqueued"
        );
        self.queue.push((operation, response_tx));
    }

    /// Closes the current window: forms a batch from the queue, feeds the
    /// adaptation loop, and hands the batch to a spawned dispatch task.
    /// The actor keeps accepting operations while the dispatch is in flight.
    ///
    /// 关闭当前窗口：将队列组成批次，喂给自适应控制环，并把批次交给派生的
    /// 派发任务。派发在途期间actor继续接受操作。
    fn drain(&mut self, reason: DrainReason, done_tx: Option<oneshot::Sender<Result<()>>>) {
        self.window_deadline = None;
        let opened_at = self.window_opened_at.take();

        if self.queue.is_empty() {
            if let Some(tx) = done_tx {
                let _ = tx.send(Ok(()));
            }
            return;
        }

        let now = Instant::now();
        let drained = std::mem::take(&mut self.queue);
        let count = drained.len();
        let (operations, waiters): (Vec<_>, Vec<_>) = drained.into_iter().unzip();

        let window_used = self.window.current();
        let next_window = self.window.on_window_closed(count);
        self.metrics.set_current_window(next_window);
        self.metrics.record_batch(window_used);

        if self.verbose {
            debug!(
                reason = ?reason,
                size = count,
                next_window = ?next_window,
                "window closed, dispatching batch"
            );
        } else {
            trace!(
                reason = ?reason,
                size = count,
                next_window = ?next_window,
                "window closed, dispatching batch"
            );
        }

        let batch = Batch {
            operations,
            opened_at: opened_at.unwrap_or(now),
            closed_at: now,
        };
        self.dispatches.spawn(dispatch_batch(
            batch,
            waiters,
            self.pending_ids.clone(),
            self.metrics.clone(),
            self.limiter.clone(),
            self.breaker.clone(),
            self.remote.clone(),
            done_tx,
        ));
    }

    /// Rejects everything still queued and waits for in-flight dispatches,
    /// so that after shutdown every submitted future has settled.
    ///
    /// 拒绝队列中剩余的所有操作并等待在途派发完成，确保关闭后每个已提交
    /// 的future都已落定。
    async fn shutdown(&mut self) {
        self.window_deadline = None;
        self.window_opened_at = None;

        // Stop accepting new commands, then reject submissions that were
        // already buffered behind the shutdown command in the channel.
        self.command_rx.close();
        let mut rejected = 0usize;
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                BatcherCommand::Submit {
                    operation,
                    response_tx,
                } => {
                    self.pending_ids.remove(&operation.id);
                    let _ = response_tx.send(Err(Error::ShuttingDown));
                    rejected += 1;
                }
                BatcherCommand::Flush { done_tx } => {
                    let _ = done_tx.send(Err(Error::ShuttingDown));
                }
                BatcherCommand::Shutdown { done_tx } => {
                    let _ = done_tx.send(());
                }
            }
        }

        rejected += self.queue.len();
        for (operation, response_tx) in self.queue.drain(..) {
            self.pending_ids.remove(&operation.id);
            let _ = response_tx.send(Err(Error::ShuttingDown));
        }
        if rejected > 0 {
            warn!(rejected, "pending operations rejected at shutdown");
        }

        while self.dispatches.join_next().await.is_some() {}
    }
}

/// Sleeps until the window deadline, or forever when no window is open.
/// 睡眠到窗口截止时刻；没有打开的窗口时永远睡眠。
async fn window_wait(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Submits one batch through the admission coordinator and the circuit
/// breaker, then demultiplexes the response back to the waiting callers.
///
/// The Nth outcome in the response settles the Nth operation's future. A
/// whole-call failure rejects every waiter with the same shared cause.
///
/// 通过准入协调器和熔断器提交一个批次，然后将响应解复用回等待的调用方。
///
/// 响应中的第N个结果完成第N个操作的future。整体调用失败时，以同一个共享
/// 原因拒绝所有等待者。
async fn dispatch_batch(
    batch: Batch,
    waiters: Vec<oneshot::Sender<Result<Bytes>>>,
    pending_ids: Arc<DashSet<String>>,
    metrics: Arc<BatchingMetrics>,
    limiter: ConcurrencyCoordinator,
    breaker: Arc<CircuitBreaker<Vec<OperationOutcome>>>,
    remote: Arc<dyn RemoteClient>,
    done_tx: Option<oneshot::Sender<Result<()>>>,
) {
    let result = async {
        let _slot = limiter.acquire().await?;
        // The slot is held for the duration of the remote call and released
        // when `_slot` drops, on every exit path. The call counter is bumped
        // inside the wrapped call, so short-circuited dispatches never
        // register as remote calls.
        breaker
            .execute(|| {
                metrics.record_remote_call();
                remote.submit_batch(&batch)
            })
            .await
    }
    .await;

    // The operations settle now; free their ids for resubmission before
    // any caller can observe the result.
    for operation in &batch.operations {
        pending_ids.remove(&operation.id);
    }

    match result {
        Ok(outcomes) => {
            let expected = batch.len();
            let got = outcomes.len();
            if got != expected {
                warn!(expected, got, "remote returned wrong result count");
            }
            let mut outcomes = outcomes.into_iter();
            for waiter in waiters {
                let item = match outcomes.next() {
                    Some(OperationOutcome::Success(payload)) => Ok(payload),
                    Some(OperationOutcome::Failure(reason)) => {
                        Err(Error::OperationFailed(reason))
                    }
                    None => Err(Error::ResultCountMismatch { expected, got }),
                };
                // A dropped receiver means the caller went away; skip it.
                let _ = waiter.send(item);
            }
            if let Some(tx) = done_tx {
                let _ = tx.send(Ok(()));
            }
        }
        Err(e) => {
            let cause = Arc::new(e);
            for waiter in waiters {
                let _ = waiter.send(Err(Error::Dispatch(cause.clone())));
            }
            if let Some(tx) = done_tx {
                let _ = tx.send(Err(Error::Dispatch(cause)));
            }
        }
    }
}
