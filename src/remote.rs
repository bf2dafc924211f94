//! 定义了与远程电子表格API之间的抽象边界。
//! Defines the abstract boundary with the remote spreadsheet API.
//!
//! The core never sees the remote wire format. It only requires one
//! operation: submit an ordered batch of operations, receive either an
//! ordered list of per-operation outcomes or a single batch-level error.
//! The adapter implementing [`RemoteClient`] must preserve ordering between
//! submitted operations and returned outcomes.
//!
//! 核心层从不接触远程的线上格式。它只需要一个操作：提交一个有序的操作批次，
//! 收到一个有序的单项结果列表，或者一个批次级别的错误。实现 [`RemoteClient`]
//! 的适配器必须保持提交的操作与返回结果之间的顺序对应。

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

/// A single logical unit of work submitted for coalescing.
///
/// 提交用于合并的单个逻辑工作单元。
#[derive(Debug, Clone)]
pub struct Operation {
    /// Unique id among currently pending operations. Caller-assigned or
    /// generated by [`Operation::new`].
    /// 在当前等待的操作中唯一的id。由调用方指定，或由 [`Operation::new`] 生成。
    pub id: String,
    /// What kind of remote mutation this operation represents.
    /// 该操作代表哪种远程修改。
    pub kind: String,
    /// Which remote document the operation applies to.
    /// 该操作作用于哪个远程文档。
    pub target: String,
    /// Opaque parameter payload, interpreted only by the remote adapter.
    /// 不透明的参数载荷，仅由远程适配器解释。
    pub params: Bytes,
}

impl Operation {
    /// Creates an operation with a generated id.
    ///
    /// 创建一个带有自动生成id的操作。
    pub fn new(
        kind: impl Into<String>,
        target: impl Into<String>,
        params: impl Into<Bytes>,
    ) -> Self {
        Self {
            id: format!("op-{:016x}", rand::random::<u64>()),
            kind: kind.into(),
            target: target.into(),
            params: params.into(),
        }
    }

    /// Creates an operation with a caller-assigned id.
    ///
    /// 创建一个由调用方指定id的操作。
    pub fn with_id(
        id: impl Into<String>,
        kind: impl Into<String>,
        target: impl Into<String>,
        params: impl Into<Bytes>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            target: target.into(),
            params: params.into(),
        }
    }
}

/// An ordered collection of operations collected within one window.
///
/// Created when the window timer fires or an explicit flush is requested;
/// consumed exactly once by the dispatch step and never mutated afterwards.
///
/// 在一个窗口内收集到的有序操作集合。
///
/// 在窗口定时器触发或显式flush时创建；被派发步骤恰好消费一次，此后不再被修改。
#[derive(Debug)]
pub struct Batch {
    /// Operations in enqueue order. The Nth outcome in the remote response
    /// corresponds to the Nth operation here.
    /// 按入队顺序排列的操作。远程响应中的第N个结果对应这里的第N个操作。
    pub operations: Vec<Operation>,
    /// When the window started accumulating.
    /// 窗口开始积累的时刻。
    pub opened_at: Instant,
    /// When the window closed and the batch was formed.
    /// 窗口关闭、批次形成的时刻。
    pub closed_at: Instant,
}

impl Batch {
    /// Number of operations in the batch.
    /// 批次中的操作数量。
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the batch is empty.
    /// 批次是否为空。
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// The per-operation outcome reported by the remote API inside one
/// successful batch response. A remote API that supports mixed results
/// surfaces per-item failures here rather than as a batch-level error.
///
/// 远程API在一次成功的批次响应中报告的单项结果。支持混合结果的远程API
/// 在此处呈现单项失败，而不是作为批次级错误。
#[derive(Debug, Clone)]
pub enum OperationOutcome {
    /// The operation was applied; the payload is its opaque result.
    /// 操作已被应用；载荷是其不透明的结果。
    Success(Bytes),
    /// The operation was rejected by the remote with the given reason.
    /// 操作被远程以给定理由拒绝。
    Failure(String),
}

/// The single abstract call through which the core reaches the remote
/// spreadsheet API.
///
/// 核心层访问远程电子表格API所经过的唯一抽象调用。
#[async_trait]
pub trait RemoteClient: Send + Sync + 'static {
    /// Submits a batch of operations, returning either one outcome per
    /// operation, in the same order, or a single batch-level error.
    ///
    /// 提交一个操作批次，按相同顺序返回每个操作的结果，或返回一个批次级错误。
    async fn submit_batch(&self, batch: &Batch) -> Result<Vec<OperationOutcome>>;
}
