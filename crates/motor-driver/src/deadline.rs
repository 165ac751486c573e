//! 周期控制循环（Deadline Loop Controller）
//!
//! 每个周期：非阻塞预读 → 阻塞读 → 计算序号与滞后 → 下发保存的命令 →
//! 遥测 → 写入历史记录 → 等待下一个绝对截止时刻。
//!
//! 线程优先放入 SCHED_DEADLINE 调度类（由内核保证截止时刻，周期末只需 `yield`）；
//! 没有权限时退化为协作式调度，用 `spin_sleep` 睡到绝对截止时刻。
//!
//! 运行期间注册表被移动到控制线程，`join` 时交还。

use crate::config::LoopConfig;
use crate::error::DriverError;
use crate::history::{HistoryBuffer, HistoryRecord, MAX_MOTORS};
use crate::rate::RateGate;
use crate::registry::MotorManager;
use crate::sched::{SchedError, set_deadline_scheduling};
use crate::telemetry::TelemetrySink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, trace, warn};

/// 调度策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingPolicy {
    /// 尝试 SCHED_DEADLINE，失败时退化为睡眠（默认）
    #[default]
    Auto,
    /// 必须使用 SCHED_DEADLINE，失败即报错
    Deadline,
    /// 不尝试实时调度
    Sleep,
}

/// 实际生效的调度方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingMode {
    /// 内核 SCHED_DEADLINE，周期末 `yield`
    Deadline,
    /// 协作式，睡到绝对截止时刻
    Sleep,
}

/// 无漂移的周期时间表
///
/// 下一个截止时刻 = 上一个截止时刻 + 周期，与当前时间无关。
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    origin: Instant,
    period: Duration,
    next: Instant,
}

impl Schedule {
    pub fn new(origin: Instant, period: Duration) -> Self {
        Self {
            origin,
            period,
            next: origin,
        }
    }

    /// 推进一个周期，返回新的截止时刻
    pub fn advance(&mut self) -> Instant {
        self.next += self.period;
        self.next
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// 当前截止时刻
    pub fn deadline(&self) -> Instant {
        self.next
    }
}

/// 控制循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LoopState {
    #[default]
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl LoopState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Idle,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// 控制循环状态（原子版本，用于线程间共享）
#[derive(Debug, Default)]
pub struct AtomicLoopState {
    inner: AtomicU8,
}

impl AtomicLoopState {
    pub fn new(state: LoopState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> LoopState {
        LoopState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LoopState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }

    /// 比较并交换，成功返回 true
    pub fn compare_exchange(&self, current: LoopState, new: LoopState) -> bool {
        self.inner
            .compare_exchange(
                current.as_u8(),
                new.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// 协作式取消标志
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

/// 一次运行的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopReport {
    pub cycles: u64,
    /// 睡眠模式下截止时刻已过、未能睡眠的周期数
    pub overruns: u64,
    /// 滞后超过阈值的周期数
    pub delay_warnings: u64,
    pub scheduling: SchedulingMode,
}

type LoopResult = Result<(MotorManager, LoopReport), DriverError>;

/// 周期控制任务
pub struct DeadlineTask {
    config: LoopConfig,
    history: Arc<HistoryBuffer>,
    state: Arc<AtomicLoopState>,
    token: CancellationToken,
    telemetry: Option<Box<dyn TelemetrySink>>,
    thread: Option<JoinHandle<LoopResult>>,
}

impl DeadlineTask {
    pub fn new(config: LoopConfig) -> Self {
        let history = Arc::new(HistoryBuffer::new(config.history_capacity));
        Self::with_history(config, history)
    }

    pub fn with_history(config: LoopConfig, history: Arc<HistoryBuffer>) -> Self {
        Self {
            config,
            history,
            state: Arc::new(AtomicLoopState::new(LoopState::Idle)),
            token: CancellationToken::new(),
            telemetry: None,
            thread: None,
        }
    }

    /// 设置遥测输出（下次 `start` 时移入控制线程）
    pub fn set_telemetry(&mut self, sink: Box<dyn TelemetrySink>) {
        self.telemetry = Some(sink);
    }

    pub fn history(&self) -> Arc<HistoryBuffer> {
        self.history.clone()
    }

    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// 取消标志（可交给信号处理器）
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 启动控制线程
    ///
    /// 上一次运行尚未 `join` 时返回 `AlreadyRunning`。启动前已经取消的标志保持有效，
    /// 控制线程不执行任何周期就退出。
    pub fn start(&mut self, manager: MotorManager) -> Result<(), DriverError> {
        self.config.validate()?;
        if manager.len() > MAX_MOTORS {
            return Err(DriverError::Config(format!(
                "{} motors bound, at most {} supported",
                manager.len(),
                MAX_MOTORS
            )));
        }
        if self.thread.is_some() || !self.state.compare_exchange(LoopState::Idle, LoopState::Running)
        {
            return Err(DriverError::AlreadyRunning);
        }

        let ctx = LoopContext {
            config: self.config.clone(),
            history: self.history.clone(),
            token: self.token.clone(),
            telemetry: self.telemetry.take(),
            origin: Instant::now(),
        };
        let state = self.state.clone();

        let spawned = thread::Builder::new()
            .name("motor-deadline".to_string())
            .spawn(move || {
                let result = run_loop(manager, ctx);
                state.set(LoopState::Idle);
                result
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            },
            Err(e) => {
                self.state.set(LoopState::Idle);
                Err(DriverError::IoThread(e.to_string()))
            },
        }
    }

    /// 请求停止（当前周期结束后生效）
    pub fn stop(&self) {
        self.state
            .compare_exchange(LoopState::Running, LoopState::Stopping);
        self.token.cancel();
    }

    pub fn done(&self) {
        self.stop();
    }

    /// 控制线程是否已退出（正常停止或出错）
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|h| h.is_finished())
    }

    /// 等待控制线程退出，交还注册表
    ///
    /// 线程退出后清除取消标志，下一次 `start` 重新开始计时。
    pub fn join(&mut self) -> Result<(MotorManager, LoopReport), DriverError> {
        let handle = self.thread.take().ok_or(DriverError::NotRunning)?;
        let joined = handle.join();
        self.token.reset();
        self.state.set(LoopState::Idle);
        joined.map_err(|_| DriverError::IoThread("deadline thread panicked".to_string()))?
    }
}

impl Drop for DeadlineTask {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.token.cancel();
            let _ = handle.join();
        }
    }
}

struct LoopContext {
    config: LoopConfig,
    history: Arc<HistoryBuffer>,
    token: CancellationToken,
    telemetry: Option<Box<dyn TelemetrySink>>,
    origin: Instant,
}

fn select_scheduling(config: &LoopConfig) -> Result<SchedulingMode, DriverError> {
    if config.scheduling == SchedulingPolicy::Sleep {
        return Ok(SchedulingMode::Sleep);
    }

    match set_deadline_scheduling(&config.deadline_params()) {
        Ok(()) => Ok(SchedulingMode::Deadline),
        Err(e) if config.scheduling == SchedulingPolicy::Deadline => Err(e.into()),
        Err(SchedError::PermissionDenied) => {
            warn!("sched_setattr: permission denied, falling back to sleep scheduling");
            Ok(SchedulingMode::Sleep)
        },
        Err(e) => {
            warn!("sched_setattr failed ({}), falling back to sleep scheduling", e);
            Ok(SchedulingMode::Sleep)
        },
    }
}

/// 最滞后设备的 (确认计数, 滞后)
///
/// 计数按 32 位回绕差值计算；没有设备时视为无滞后。
fn worst_delay(sequence: u32, manager: &MotorManager) -> (u32, i64) {
    manager
        .statuses()
        .iter()
        .map(|s| {
            let received = s.host_timestamp_received;
            (received, sequence.wrapping_sub(received) as i32 as i64)
        })
        .max_by_key(|&(_, delay)| delay)
        .unwrap_or((sequence, 0))
}

fn run_loop(mut manager: MotorManager, mut ctx: LoopContext) -> LoopResult {
    let scheduling = match select_scheduling(&ctx.config) {
        Ok(mode) => mode,
        Err(e) => {
            error!("Deadline thread failed to start: {}", e);
            return Err(e);
        },
    };
    info!(
        "Deadline thread started: period {:?}, {} motor(s), {:?} scheduling",
        ctx.config.period(),
        manager.len(),
        scheduling
    );

    let mut schedule = Schedule::new(ctx.origin, ctx.config.period());
    let mut record = HistoryRecord::new(ctx.origin);
    let mut delay_gate = RateGate::new(ctx.config.warn_interval());
    let mut report = LoopReport {
        cycles: 0,
        overruns: 0,
        delay_warnings: 0,
        scheduling,
    };

    while !ctx.token.is_cancelled() {
        let deadline = schedule.advance();
        record.last_time_start = record.time_start;
        record.time_start = Instant::now();

        // 预读结果丢弃，随后的阻塞读才是权威读取
        manager.aread();
        record.aread_time = Instant::now();

        if let Err(e) = manager.read() {
            error!("Deadline thread stopping: {}", e);
            return Err(e);
        }
        record.read_time = Instant::now();

        let sequence = manager.count().wrapping_add(1);
        let (count_received, delay) = worst_delay(sequence, &manager);
        record.sequence = sequence;
        record.count_received = count_received;
        record.delay = delay;
        if delay > ctx.config.delay_warn_threshold {
            report.delay_warnings += 1;
            if delay_gate.ready() {
                warn!("Delay > {}: {}", ctx.config.delay_warn_threshold, delay);
            }
        }

        if let Err(e) = manager.write_saved_commands() {
            error!("Deadline thread stopping: {}", e);
            return Err(e);
        }
        record.write_time = Instant::now();
        record.fill(manager.statuses(), manager.commands());

        if let Some(sink) = ctx.telemetry.as_mut() {
            sink.send(&record);
        }
        ctx.history.push(record);
        record.last_time_end = Instant::now();
        report.cycles += 1;

        match scheduling {
            SchedulingMode::Deadline => thread::yield_now(),
            SchedulingMode::Sleep => {
                let now = Instant::now();
                if deadline > now {
                    spin_sleep::sleep(deadline - now);
                } else {
                    report.overruns += 1;
                    trace!("Cycle {} overran deadline by {:?}", report.cycles, now - deadline);
                }
            },
        }
    }

    info!("Deadline thread exits after {} cycles", report.cycles);
    Ok((manager, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_drift_free() {
        let origin = Instant::now();
        let period = Duration::from_micros(500);
        let mut schedule = Schedule::new(origin, period);

        for k in 1..=1000u32 {
            // 每个周期的执行时间抖动不影响截止时刻
            let deadline = schedule.advance();
            assert_eq!(deadline, origin + period * k);
        }
        assert_eq!(schedule.deadline(), origin + period * 1000);
        assert_eq!(schedule.origin(), origin);
    }

    #[test]
    fn test_loop_state_roundtrip() {
        assert_eq!(LoopState::from_u8(0), LoopState::Idle);
        assert_eq!(LoopState::from_u8(1), LoopState::Running);
        assert_eq!(LoopState::from_u8(2), LoopState::Stopping);
        assert_eq!(LoopState::from_u8(200), LoopState::Idle);
    }

    #[test]
    fn test_atomic_loop_state_cas() {
        let state = AtomicLoopState::new(LoopState::Idle);
        assert!(state.compare_exchange(LoopState::Idle, LoopState::Running));
        assert!(!state.compare_exchange(LoopState::Idle, LoopState::Running));
        assert_eq!(state.get(), LoopState::Running);
        state.set(LoopState::Stopping);
        assert_eq!(state.get(), LoopState::Stopping);
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }

    #[test]
    fn test_sleep_policy_skips_deadline_attempt() {
        let config = LoopConfig {
            scheduling: SchedulingPolicy::Sleep,
            ..Default::default()
        };
        assert_eq!(select_scheduling(&config).unwrap(), SchedulingMode::Sleep);
    }

    #[test]
    fn test_join_without_start() {
        let mut task = DeadlineTask::new(LoopConfig::default());
        assert!(matches!(task.join(), Err(DriverError::NotRunning)));
        assert_eq!(task.state(), LoopState::Idle);
        assert!(task.is_finished());
    }
}
