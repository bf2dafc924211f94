//! 针对远程依赖的故障隔离状态机（熔断器）。
//! The failure-isolation state machine (circuit breaker) for a remote dependency.
//!
//! The breaker wraps every call to a dependency. While the dependency is
//! healthy the breaker stays CLOSED and calls pass through. A run of
//! consecutive failures trips it OPEN: calls are then short-circuited
//! without touching the dependency until a cooldown elapses, after which a
//! single trial call probes recovery in the HALF_OPEN state.
//!
//! 熔断器包装对依赖的每一次调用。依赖健康时熔断器保持关闭，调用直接通过。
//! 连续失败达到阈值后熔断器跳闸打开：此后的调用被短路，不再触达依赖，
//! 直到冷却期结束，由一次试探调用在半开状态下探测依赖是否恢复。

pub mod registry;


use crate::{
    config::BreakerConfig,
    error::{Error, Result},
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// A fallback handler invoked instead of the wrapped call while the
/// breaker is open. Registration order is preserved; the first registered
/// handler is the one invoked.
///
/// 熔断器打开期间代替被包装调用执行的回退处理器。注册顺序被保留；
/// 第一个注册的处理器是被调用的那个。
pub type FallbackFn<T> = Arc<dyn Fn() -> Result<T> + Send + Sync>;

/// The state of the circuit breaker.
/// 熔断器的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through; failures are counted.
    /// 调用直接通过；失败被计数。
    Closed,
    /// Calls are short-circuited until the cooldown expires.
    /// 调用被短路，直到冷却期结束。
    Open,
    /// A trial call is probing whether the dependency has recovered.
    /// 试探调用正在探测依赖是否恢复。
    HalfOpen,
}

/// A read-only snapshot of a breaker's counters and state.
/// 熔断器计数与状态的只读快照。
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    /// The breaker's configured name.
    pub name: String,
    /// Current state.
    pub state: BreakerState,
    /// Consecutive failures observed while closed.
    pub failure_count: u32,
    /// Consecutive successes observed while half-open.
    pub success_count: u32,
    /// Underlying calls actually attempted. Short-circuited calls are not
    /// counted here.
    /// 实际尝试的底层调用次数。被短路的调用不计入。
    pub total_requests: u64,
    /// When the last failure was observed.
    pub last_failure: Option<Instant>,
    /// When an open breaker will next allow a trial call.
    pub next_attempt: Option<Instant>,
    /// How many times a fallback was invoked instead of the call.
    pub fallback_invocations: u64,
    /// Number of registered fallback handlers.
    pub fallback_count: usize,
}

/// Counters and state behind the breaker's mutex.
#[derive(Debug)]
struct BreakerCore {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    total_requests: u64,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    fallback_invocations: u64,
}

/// A circuit breaker protecting calls that produce a `T`.
///
/// State transitions are serialized by an internal mutex that is held only
/// around transition decisions, never across the wrapped call's await, so
/// exactly one caller performs each CLOSED→OPEN or OPEN→HALF_OPEN
/// transition even under concurrent load.
///
/// 保护产生 `T` 的调用的熔断器。
///
/// 状态转换由内部互斥锁串行化，该锁只在转换决策期间持有，绝不跨越被包装
/// 调用的await，因此即使在并发负载下，每次 CLOSED→OPEN 或 OPEN→HALF_OPEN
/// 的转换也恰好由一个调用方执行。
pub struct CircuitBreaker<T> {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
    core: Mutex<BreakerCore>,
    fallbacks: Mutex<Vec<FallbackFn<T>>>,
}

impl<T> std::fmt::Debug for CircuitBreaker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<T> CircuitBreaker<T> {
    /// Creates a breaker in the CLOSED state.
    ///
    /// 创建一个处于关闭状态的熔断器。
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            name: config.name.clone(),
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            timeout: config.timeout,
            core: Mutex::new(BreakerCore {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                total_requests: 0,
                last_failure: None,
                next_attempt: None,
                fallback_invocations: 0,
            }),
            fallbacks: Mutex::new(Vec::new()),
        }
    }

    /// The breaker's configured name.
    /// 熔断器的配置名称。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers an additional fallback handler. The first registered
    /// handler is the one invoked on short-circuit.
    ///
    /// 注册一个额外的回退处理器。短路时被调用的是第一个注册的处理器。
    pub fn register_fallback(&self, fallback: FallbackFn<T>) {
        let mut fallbacks = lock(&self.fallbacks);
        fallbacks.push(fallback);
        debug!(
            breaker = %self.name,
            fallback_count = fallbacks.len(),
            "fallback registered"
        );
    }

    /// Runs `call` under the breaker policy.
    ///
    /// Returns the call's result on success. On short-circuit, returns the
    /// first fallback's result if one is registered, otherwise a
    /// [`Error::CircuitOpen`] that is distinguishable from a call failure.
    ///
    /// 在熔断器策略下运行 `call`。
    ///
    /// 成功时返回调用结果。短路时，如果注册了回退处理器则返回第一个回退
    /// 的结果，否则返回可与调用失败区分开的 [`Error::CircuitOpen`]。
    pub async fn execute<F, Fut>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(short_circuit) = self.admit() {
            return short_circuit;
        }

        let result = call().await;

        let mut core = lock(&self.core);
        match result {
            Ok(value) => {
                self.on_success(&mut core);
                Ok(value)
            }
            Err(e) => {
                self.on_failure(&mut core);
                Err(e)
            }
        }
    }

    /// Returns a read-only snapshot of the breaker's counters and state.
    ///
    /// 返回熔断器计数与状态的只读快照。
    pub fn snapshot(&self) -> BreakerSnapshot {
        let core = lock(&self.core);
        BreakerSnapshot {
            name: self.name.clone(),
            state: core.state,
            failure_count: core.failure_count,
            success_count: core.success_count,
            total_requests: core.total_requests,
            last_failure: core.last_failure,
            next_attempt: core.next_attempt,
            fallback_invocations: core.fallback_invocations,
            fallback_count: lock(&self.fallbacks).len(),
        }
    }

    /// Decides whether the call may proceed. Returns `Some` with the
    /// short-circuit result when it may not.
    ///
    /// 决定调用是否可以继续。不可以时返回 `Some` 及短路结果。
    fn admit(&self) -> Option<Result<T>> {
        let mut core = lock(&self.core);

        if core.state == BreakerState::Open {
            let now = Instant::now();
            match core.next_attempt {
                Some(next_attempt) if now < next_attempt => {
                    // Cooldown still running: short-circuit this call.
                    let fallback = lock(&self.fallbacks).first().cloned();
                    return Some(match fallback {
                        Some(fallback) => {
                            core.fallback_invocations += 1;
                            trace!(
                                breaker = %self.name,
                                invocations = core.fallback_invocations,
                                "circuit open, invoking fallback"
                            );
                            drop(core);
                            fallback()
                        }
                        None => {
                            trace!(breaker = %self.name, "circuit open, failing fast");
                            Err(Error::CircuitOpen(self.name.clone()))
                        }
                    });
                }
                _ => {
                    // Cooldown expired: this call becomes the trial.
                    core.state = BreakerState::HalfOpen;
                    core.success_count = 0;
                    info!(breaker = %self.name, "circuit half-open, allowing trial call");
                }
            }
        }

        core.total_requests += 1;
        None
    }

    fn on_success(&self, core: &mut BreakerCore) {
        match core.state {
            BreakerState::HalfOpen => {
                core.success_count += 1;
                debug!(
                    breaker = %self.name,
                    successes = core.success_count,
                    threshold = self.success_threshold,
                    "trial call succeeded"
                );
                if core.success_count >= self.success_threshold {
                    core.state = BreakerState::Closed;
                    core.failure_count = 0;
                    core.success_count = 0;
                    core.next_attempt = None;
                    info!(breaker = %self.name, "circuit closed, dependency recovered");
                }
            }
            BreakerState::Closed => {
                // A success breaks any run of consecutive failures.
                core.failure_count = 0;
            }
            // A call admitted while closed may finish after concurrent
            // failures tripped the breaker; the cooldown stands.
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self, core: &mut BreakerCore) {
        let now = Instant::now();
        core.last_failure = Some(now);
        match core.state {
            BreakerState::HalfOpen => {
                core.state = BreakerState::Open;
                core.success_count = 0;
                core.next_attempt = Some(now + self.timeout);
                warn!(
                    breaker = %self.name,
                    cooldown = ?self.timeout,
                    "trial call failed, circuit re-opened"
                );
            }
            BreakerState::Closed => {
                core.failure_count += 1;
                if core.failure_count >= self.failure_threshold {
                    core.state = BreakerState::Open;
                    core.next_attempt = Some(now + self.timeout);
                    warn!(
                        breaker = %self.name,
                        failures = core.failure_count,
                        cooldown = ?self.timeout,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            BreakerState::Open => {
                core.next_attempt = Some(now + self.timeout);
            }
        }
    }
}

/// Locks a mutex, recovering the inner data if a previous holder panicked.
/// 锁定互斥锁；若先前的持有者panic过，则恢复其内部数据。
fn lock<G>(mutex: &Mutex<G>) -> MutexGuard<'_, G> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
