//! 驱动层错误类型定义

use crate::sched::SchedError;
use motor_protocol::{ModeDesired, ProtocolError};
use motor_transport::TransportError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 没有匹配的设备
    #[error("Found no motors matching {what}: {key}")]
    NotFound { what: &'static str, key: String },

    /// 多个设备匹配同一标识（拒绝绑定）
    #[error("Found too many motors matching {what}: {key} ({count} matches)")]
    Ambiguous {
        what: &'static str,
        key: String,
        count: usize,
    },

    /// 同一设备被请求了多次
    #[error("Motor requested more than once: {0}")]
    DuplicateMotor(String),

    /// 打开设备失败
    #[error("Failed to open {device}: {source}")]
    OpenFailed {
        device: String,
        #[source]
        source: TransportError,
    },

    /// 读取失败（未启用重连时对整批致命）
    #[error("No data read from {device}: {source}")]
    ReadFailed {
        device: String,
        #[source]
        source: TransportError,
    },

    #[error("Write to {device} failed: {source}")]
    WriteFailed {
        device: String,
        #[source]
        source: TransportError,
    },

    /// 记录数与绑定设备数不一致
    #[error("Count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Buffer too short: expected {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    /// 命令的当前模式不含该字段
    #[error("Command {index} in mode {mode:?} has no {field} field")]
    ModeMismatch {
        index: usize,
        mode: ModeDesired,
        field: &'static str,
    },

    /// 控制循环已在运行
    #[error("Deadline task already running")]
    AlreadyRunning,

    /// 控制循环未启动
    #[error("Deadline task not running")]
    NotRunning,

    /// 控制线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),

    /// 配置错误
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// 实时调度设置失败
    #[error("Scheduling error: {0}")]
    Sched(#[from] SchedError),
}

#[cfg(test)]
mod tests {
    use super::DriverError;
    use motor_protocol::{ModeDesired, ProtocolError};
    use motor_transport::TransportError;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::NotFound {
            what: "name",
            key: "J1".to_string(),
        };
        assert_eq!(format!("{}", err), "Found no motors matching name: J1");

        let err = DriverError::Ambiguous {
            what: "serial number",
            key: "SN1".to_string(),
            count: 2,
        };
        assert!(format!("{}", err).contains("too many motors"));

        let err = DriverError::ModeMismatch {
            index: 1,
            mode: ModeDesired::StepperTuning,
            field: "position",
        };
        assert_eq!(
            format!("{}", err),
            "Command 1 in mode StepperTuning has no position field"
        );

        let err = DriverError::CountMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(format!("{}", err), "Count mismatch: expected 3, got 2");
    }

    #[test]
    fn test_from_transport_error() {
        let err: DriverError = TransportError::NotOpen("/dev/mtr0".to_string()).into();
        match err {
            DriverError::Transport(TransportError::NotOpen(path)) => assert_eq!(path, "/dev/mtr0"),
            _ => panic!("Expected Transport variant"),
        }
    }

    #[test]
    fn test_from_protocol_error() {
        let err: DriverError = ProtocolError::InvalidValue {
            field: "mode_desired",
            value: 99,
        }
        .into();
        assert!(matches!(
            err,
            DriverError::Protocol(ProtocolError::InvalidValue { value: 99, .. })
        ));
    }

    #[test]
    fn test_read_failed_keeps_source() {
        use std::error::Error;
        let err = DriverError::ReadFailed {
            device: "J2".to_string(),
            source: TransportError::WriteTimeout,
        };
        assert!(err.source().is_some());
        assert!(format!("{}", err).starts_with("No data read from J2"));
    }
}
