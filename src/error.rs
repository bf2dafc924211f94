//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use std::sync::Arc;
use thiserror::Error;

/// The primary error type for the batching and resilience pipeline.
/// 批处理与弹性管线的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// An operation with the same id is already pending in the batch queue.
    /// 具有相同id的操作已经在批处理队列中等待。
    #[error("operation `{0}` is already pending")]
    DuplicateOperation(String),

    /// The remote call for a whole batch failed; every operation in the
    /// batch carries the same underlying cause.
    ///
    /// 整个批次的远程调用失败；批次中的每个操作都携带相同的根本原因。
    #[error("batch dispatch failed: {0}")]
    Dispatch(Arc<Error>),

    /// The circuit breaker is open and no fallback is registered. This is
    /// a short-circuit, not a genuine remote failure.
    ///
    /// 熔断器处于打开状态且未注册回退处理器。这是一次短路，并非真正的远程失败。
    #[error("circuit breaker `{0}` is open")]
    CircuitOpen(String),

    /// The remote API reported a batch-level failure.
    /// 远程API报告了批次级别的失败。
    #[error("remote call failed: {0}")]
    Remote(String),

    /// The remote API reported a per-item failure for this operation.
    /// 远程API报告了该操作的单项失败。
    #[error("operation failed remotely: {0}")]
    OperationFailed(String),

    /// The remote response contained a different number of results than
    /// operations sent.
    ///
    /// 远程响应包含的结果数与发送的操作数不一致。
    #[error("remote returned {got} results for {expected} operations")]
    ResultCountMismatch { expected: usize, got: usize },

    /// The batching system is shutting down; the operation was not dispatched.
    /// 批处理系统正在关闭；该操作未被派发。
    #[error("batching system is shutting down")]
    ShuttingDown,

    /// An internal channel for communication between tasks was closed unexpectedly.
    /// 用于任务间通信的内部通道意外关闭。
    #[error("internal channel is broken")]
    ChannelClosed,
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error is a circuit-breaker short-circuit,
    /// looking through the batch-level [`Error::Dispatch`] wrapper.
    ///
    /// 判断此错误是否为熔断器短路，会透过批次级 [`Error::Dispatch`] 包装进行检查。
    pub fn is_circuit_open(&self) -> bool {
        match self {
            Error::CircuitOpen(_) => true,
            Error::Dispatch(cause) => cause.is_circuit_open(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a shutdown in progress.
    /// 判断此错误是否表示系统正在关闭。
    pub fn is_shutdown(&self) -> bool {
        match self {
            Error::ShuttingDown => true,
            Error::Dispatch(cause) => cause.is_shutdown(),
            _ => false,
        }
    }
}
