//! 最小间隔门限
//!
//! 用于限制重连尝试和告警日志的频率。时间来源可注入，测试中使用 [`ManualClock`]。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 单调时钟接口（返回自任意固定起点以来的时长）
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// 基于 `Instant` 的单调时钟
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// 手动推进的时钟（克隆共享同一时间）
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn set(&self, at: Duration) {
        self.nanos.store(at.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }
}

/// 最小间隔门限：每个间隔内最多放行一次，第一次调用总是放行
///
/// 克隆共享同一时钟，但各自计时。
#[derive(Clone)]
pub struct RateGate {
    clock: Arc<dyn Clock>,
    interval: Duration,
    last: Option<Duration>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 是否放行；放行时记录本次时间
    pub fn ready(&mut self) -> bool {
        let now = self.clock.now();
        match self.last {
            Some(last) if now.saturating_sub(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            },
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl std::fmt::Debug for RateGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGate")
            .field("interval", &self.interval)
            .field("last", &self.last)
            .finish()
    }
}
