#![deny(clippy::expect_used, clippy::unwrap_used)]

//! The root of the client-side batching and resilience library.
//! 客户端批处理与弹性库的根。
//!
//! gridpipe sits between high-level spreadsheet operation handlers and a
//! remote, quota-limited spreadsheet API. It coalesces many small
//! operations into fewer round trips, bounds the number of requests in
//! flight, and isolates failures of the remote API behind a circuit
//! breaker so a degraded dependency does not cascade.
//!
//! gridpipe位于高层电子表格操作处理器与受配额限制的远程电子表格API之间。
//! 它将许多小操作合并为更少的往返、限制在途请求的数量，并用熔断器隔离
//! 远程API的故障，使退化的依赖不会级联扩散。

pub mod batch;
pub mod breaker;
pub mod config;
pub mod error;
pub mod limiter;
pub mod remote;
