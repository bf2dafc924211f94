//! 定义了批处理管线的可配置参数。
//! Defines configurable parameters for the batching pipeline.

use std::time::Duration;

/// A structure containing all configurable parameters for the pipeline.
///
/// 包含管线所有可配置参数的结构体。
#[derive(Debug, Clone)]
pub struct Config {
    /// Batching window-related parameters.
    /// 批处理窗口相关参数。
    pub batching: BatchingConfig,

    /// Concurrency admission-related parameters.
    /// 并发准入相关参数。
    pub concurrency: ConcurrencyConfig,

    /// Circuit breaker-related parameters.
    /// 熔断器相关参数。
    pub breaker: BreakerConfig,
}

/// Batching window-related parameters.
///
/// 批处理窗口相关参数。
#[derive(Debug, Clone)]
pub struct BatchingConfig {
    /// Whether the window duration adapts to observed traffic. When false,
    /// every window lasts exactly `window`.
    /// 窗口持续时间是否根据观察到的流量自适应。为false时每个窗口的时长恒为 `window`。
    pub adaptive_window: bool,
    /// The fixed window duration used when `adaptive_window` is false.
    /// 当 `adaptive_window` 为false时使用的固定窗口时长。
    pub window: Duration,
    /// Parameters for the adaptive window control loop.
    /// 自适应窗口控制环的参数。
    pub adaptive: AdaptiveWindowConfig,
    /// Emit per-batch lifecycle logs at debug level instead of trace.
    /// 以debug级别而非trace级别输出每个批次的生命周期日志。
    pub verbose_logging: bool,
    /// The capacity of the internal command channel between the public
    /// handle and the batching actor.
    ///
    /// 公共句柄与批处理actor之间内部命令通道的容量。
    pub command_channel_capacity: usize,
}

/// Parameters for the adaptive window control loop.
///
/// 自适应窗口控制环的参数。
#[derive(Debug, Clone)]
pub struct AdaptiveWindowConfig {
    /// The minimum window duration. The window will not be allowed to fall below this.
    /// 最小窗口时长。窗口不允许低于此值。
    pub min_window: Duration,
    /// The maximum window duration. The window will not be allowed to exceed this.
    /// 最大窗口时长。窗口不允许超过此值。
    pub max_window: Duration,
    /// The window duration a fresh system starts with.
    /// 新系统启动时的初始窗口时长。
    pub initial_window: Duration,
    /// If a closed window collected fewer operations than this, the window
    /// is too small to amortize dispatch overhead and is lengthened.
    /// 如果关闭的窗口收集到的操作数少于此值，说明窗口太小不足以摊销派发开销，将被拉长。
    pub low_threshold: usize,
    /// If a closed window collected more operations than this, the window
    /// is oversubscribed and is shortened to trade batch size for latency.
    /// 如果关闭的窗口收集到的操作数多于此值，说明窗口过载，将被缩短以用批次大小换取延迟。
    pub high_threshold: usize,
}

/// Concurrency admission-related parameters.
///
/// 并发准入相关参数。
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    /// The maximum number of remote calls allowed in flight simultaneously.
    /// 允许同时在途的远程调用的最大数量。
    pub max_concurrent: usize,
}

/// Circuit breaker-related parameters.
///
/// 熔断器相关参数。
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// A human-readable name for the breaker, used in logs and errors.
    /// 熔断器的可读名称，用于日志和错误信息。
    pub name: String,
    /// The number of consecutive failures that trips the breaker open.
    /// 使熔断器跳闸打开的连续失败次数。
    pub failure_threshold: u32,
    /// The number of consecutive successes in the half-open state required
    /// to close the breaker again.
    /// 半开状态下重新关闭熔断器所需的连续成功次数。
    pub success_threshold: u32,
    /// How long an open breaker waits before allowing a trial call through.
    /// 打开的熔断器在放行试探调用之前等待的时长。
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batching: BatchingConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            adaptive_window: true,
            window: Duration::from_millis(50),
            adaptive: AdaptiveWindowConfig::default(),
            verbose_logging: false,
            command_channel_capacity: 128,
        }
    }
}

impl Default for AdaptiveWindowConfig {
    fn default() -> Self {
        Self {
            min_window: Duration::from_millis(20),
            max_window: Duration::from_millis(200),
            initial_window: Duration::from_millis(50),
            low_threshold: 3,
            high_threshold: 50,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 15, // conservative headroom under typical API quotas
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: "remote-api".to_string(),
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}
