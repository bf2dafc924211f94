//! 按名称登记熔断器的进程级目录，供健康报告读取。
//! A process-wide directory of named circuit breakers, read by health reporting.
//!
//! The registry holds references for reporting only; it never owns a
//! breaker's lifecycle. It is an explicitly constructed object so tests can
//! instantiate isolated registries, with a single process-wide default
//! available from [`CircuitBreakerRegistry::global`] for composition roots
//! that want one.
//!
//! 注册表只持有用于报告的引用，从不拥有熔断器的生命周期。它是显式构造的
//! 对象，便于测试创建相互隔离的注册表；需要时，组合根可以通过
//! [`CircuitBreakerRegistry::global`] 获得唯一的进程级默认实例。

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// The reporting-only view of a breaker held by the registry. Implemented
/// by [`CircuitBreaker`] for every success type, so breakers protecting
/// different call types can live in one registry.
///
/// 注册表持有的熔断器只读报告视图。[`CircuitBreaker`] 对每种成功类型都实现
/// 了它，因此保护不同调用类型的熔断器可以共存于同一个注册表。
pub trait BreakerStatsSource: Send + Sync {
    /// The breaker's configured name.
    fn name(&self) -> &str;
    /// A read-only snapshot of the breaker's counters and state.
    fn snapshot(&self) -> BreakerSnapshot;
}

impl<T: Send + 'static> BreakerStatsSource for CircuitBreaker<T> {
    fn name(&self) -> &str {
        CircuitBreaker::name(self)
    }

    fn snapshot(&self) -> BreakerSnapshot {
        CircuitBreaker::snapshot(self)
    }
}

/// A (name, breaker reference, description) tuple held by the registry.
/// 注册表持有的（名称，熔断器引用，描述）三元组。
#[derive(Clone)]
pub struct RegistryEntry {
    /// The name the breaker was registered under.
    pub name: String,
    /// Reporting-only reference to the breaker.
    pub breaker: Arc<dyn BreakerStatsSource>,
    /// Human-readable description of what the breaker protects.
    pub description: String,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A directory of named circuit breakers.
///
/// Registration and clearing race safely against reporting reads; a
/// re-registration under an existing name replaces the entry.
///
/// 按名称登记的熔断器目录。
///
/// 注册和清空与报告读取之间可以安全并发；用已有名称重新注册会替换条目。
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry.
    /// 创建一个空的注册表。
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default registry.
    ///
    /// 进程级默认注册表。
    pub fn global() -> &'static CircuitBreakerRegistry {
        static GLOBAL: OnceLock<CircuitBreakerRegistry> = OnceLock::new();
        GLOBAL.get_or_init(CircuitBreakerRegistry::new)
    }

    /// Stores the entry for `name`, replacing any existing entry.
    ///
    /// 存储 `name` 对应的条目，替换任何已有条目。
    pub fn register(
        &self,
        name: impl Into<String>,
        breaker: Arc<dyn BreakerStatsSource>,
        description: impl Into<String>,
    ) {
        let name = name.into();
        let entry = RegistryEntry {
            name: name.clone(),
            breaker,
            description: description.into(),
        };
        if self.entries.insert(name.clone(), entry).is_some() {
            warn!(%name, "circuit breaker re-registered, replacing existing entry");
        } else {
            debug!(%name, "circuit breaker registered");
        }
    }

    /// Returns all entries, for iteration by status reporting.
    ///
    /// 返回所有条目，供状态报告迭代。
    pub fn get_all(&self) -> Vec<RegistryEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Returns a map from registered name to that breaker's current
    /// snapshot. This is the primary read path for health reporting and
    /// only performs simple reads on each breaker.
    ///
    /// 返回从注册名称到对应熔断器当前快照的映射。这是健康报告的主要读取
    /// 路径，对每个熔断器只执行简单读取。
    pub fn get_all_stats(&self) -> HashMap<String, BreakerSnapshot> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().breaker.snapshot()))
            .collect()
    }

    /// Removes all entries. The breakers themselves are unaffected.
    ///
    /// 移除所有条目。熔断器本身不受影响。
    pub fn clear(&self) {
        self.entries.clear();
        debug!("circuit breaker registry cleared");
    }

    /// Number of registered entries.
    /// 已注册条目的数量。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no entries.
    /// 注册表是否为空。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
