//! 批处理actor使用的命令。
//! Commands used by the batching actor.

use crate::{error::Result, remote::Operation};
use bytes::Bytes;
use tokio::sync::oneshot;

/// Commands sent from the [`BatchingSystem`](crate::batch::BatchingSystem)
/// handle to the batching actor.
///
/// 从 [`BatchingSystem`](crate::batch::BatchingSystem) 句柄发送到批处理
/// actor的命令。
#[derive(Debug)]
pub(crate) enum BatcherCommand {
    /// Enqueue one operation; the sender resolves with that operation's
    /// individual result once its batch settles.
    /// 将一个操作入队；其批次落定后，发送端以该操作的单独结果完成。
    Submit {
        operation: Operation,
        response_tx: oneshot::Sender<Result<Bytes>>,
    },
    /// Drain and dispatch whatever is queued, bypassing the remaining
    /// window wait. Resolves once the forced dispatch settles.
    /// 立即派发当前队列中的所有内容，跳过剩余的窗口等待。强制派发落定后完成。
    Flush { done_tx: oneshot::Sender<Result<()>> },
    /// Stop the actor: reject queued operations, wait for in-flight
    /// dispatches, then acknowledge.
    /// 停止actor：拒绝排队中的操作，等待在途派发完成，然后确认。
    Shutdown { done_tx: oneshot::Sender<()> },
}
