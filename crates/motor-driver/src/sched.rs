//! SCHED_DEADLINE 调度设置
//!
//! glibc 没有 `sched_setattr` 包装，直接走系统调用。

use std::io;
use std::time::Duration;
use thiserror::Error;

/// 实时调度错误
#[derive(Error, Debug)]
pub enum SchedError {
    /// 权限不足（非 root 且没有 CAP_SYS_NICE）
    #[error("Permission denied for SCHED_DEADLINE")]
    PermissionDenied,
    /// 内核或平台不支持
    #[error("SCHED_DEADLINE not supported on this system")]
    Unsupported,
    /// 参数不满足 runtime <= deadline <= period
    #[error("Invalid deadline parameters: {0}")]
    InvalidParams(String),
    #[error("sched_setattr failed: {0}")]
    Os(io::Error),
}

/// 固定的运行时间预算
pub const DEFAULT_RUNTIME: Duration = Duration::from_micros(300);

/// SCHED_DEADLINE 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineParams {
    pub runtime: Duration,
    pub deadline: Duration,
    pub period: Duration,
}

impl DeadlineParams {
    /// 由周期推导：deadline = period * ratio
    pub fn from_period(period: Duration, runtime: Duration, deadline_ratio: f64) -> Self {
        Self {
            runtime,
            deadline: Duration::from_nanos(
                (period.as_nanos() as f64 * deadline_ratio).round() as u64,
            ),
            period,
        }
    }

    pub fn validate(&self) -> Result<(), SchedError> {
        if self.runtime.is_zero() || self.period.is_zero() {
            return Err(SchedError::InvalidParams(
                "runtime and period must be non-zero".to_string(),
            ));
        }
        if self.runtime > self.deadline || self.deadline > self.period {
            return Err(SchedError::InvalidParams(format!(
                "expected runtime ({:?}) <= deadline ({:?}) <= period ({:?})",
                self.runtime, self.deadline, self.period
            )));
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{DeadlineParams, SchedError};
    use std::io;

    const SCHED_DEADLINE: u32 = 6;

    #[repr(C)]
    #[derive(Debug, Default)]
    struct SchedAttr {
        size: u32,
        sched_policy: u32,
        sched_flags: u64,
        sched_nice: i32,
        sched_priority: u32,
        // 以下单位均为纳秒
        sched_runtime: u64,
        sched_deadline: u64,
        sched_period: u64,
    }

    pub(super) fn set_current_thread(params: &DeadlineParams) -> Result<(), SchedError> {
        let attr = SchedAttr {
            size: std::mem::size_of::<SchedAttr>() as u32,
            sched_policy: SCHED_DEADLINE,
            sched_runtime: params.runtime.as_nanos() as u64,
            sched_deadline: params.deadline.as_nanos() as u64,
            sched_period: params.period.as_nanos() as u64,
            ..Default::default()
        };

        // SAFETY: attr 在调用期间有效，pid 0 表示当前线程
        let ret = unsafe {
            libc::syscall(
                libc::SYS_sched_setattr,
                0 as libc::pid_t,
                &attr as *const SchedAttr,
                0 as libc::c_uint,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EPERM) => SchedError::PermissionDenied,
                Some(libc::ENOSYS) => SchedError::Unsupported,
                _ => SchedError::Os(err),
            });
        }
        Ok(())
    }
}

/// 把当前线程放入 SCHED_DEADLINE 调度类
pub fn set_deadline_scheduling(params: &DeadlineParams) -> Result<(), SchedError> {
    params.validate()?;

    #[cfg(target_os = "linux")]
    {
        linux::set_current_thread(params)
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err(SchedError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_period() {
        let params = DeadlineParams::from_period(Duration::from_micros(500), DEFAULT_RUNTIME, 0.6);
        assert_eq!(params.deadline, Duration::from_micros(300));
        assert_eq!(params.runtime, Duration::from_micros(300));
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_params_validation() {
        let params = DeadlineParams {
            runtime: Duration::from_micros(400),
            deadline: Duration::from_micros(300),
            period: Duration::from_micros(500),
        };
        assert!(matches!(params.validate(), Err(SchedError::InvalidParams(_))));

        let params = DeadlineParams {
            runtime: Duration::ZERO,
            deadline: Duration::from_micros(300),
            period: Duration::from_micros(500),
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_invalid_params_never_reach_kernel() {
        let params = DeadlineParams {
            runtime: Duration::from_millis(2),
            deadline: Duration::from_millis(1),
            period: Duration::from_millis(1),
        };
        assert!(matches!(
            set_deadline_scheduling(&params),
            Err(SchedError::InvalidParams(_))
        ));
    }
}
