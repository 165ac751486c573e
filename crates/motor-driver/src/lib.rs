//! 驱动层模块
//!
//! 在传输层之上提供：
//! - 设备注册表（按名称/序列号/路径绑定，可选重连策略）
//! - 命令编辑与批量读写
//! - 周期控制循环（SCHED_DEADLINE 或绝对时刻睡眠）
//! - 无撕裂的历史记录环形缓冲区
//! - TOML 配置
//!
//! # 使用场景
//!
//! 单次读写直接使用 [`MotorManager`]；固定周期控制把注册表交给 [`DeadlineTask`]，
//! 通过 [`HistoryBuffer`] 旁路观察每个周期。

pub mod config;
pub mod deadline;
mod error;
pub mod history;
pub mod rate;
pub mod registry;
pub mod sched;
pub mod telemetry;

pub use config::{DriverConfig, LoopConfig, MotorConfig};
pub use deadline::{
    AtomicLoopState, CancellationToken, DeadlineTask, LoopReport, LoopState, Schedule,
    SchedulingMode, SchedulingPolicy,
};
pub use error::DriverError;
pub use history::{DEFAULT_HISTORY_CAPACITY, HistoryBuffer, HistoryRecord, MAX_MOTORS};
pub use rate::{Clock, ManualClock, MonotonicClock, RateGate};
pub use registry::{
    DEFAULT_POLL_TIMEOUT, DEFAULT_RECONNECT_INTERVAL, LookupKey, MotorManager, serialize_commands,
};
pub use sched::{DEFAULT_RUNTIME, DeadlineParams, SchedError, set_deadline_scheduling};
pub use telemetry::{TELEMETRY_PACKET_SIZE, TcpTelemetry, TelemetrySink, encode_packet};
