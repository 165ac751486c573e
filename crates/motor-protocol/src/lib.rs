//! # Motor Protocol
//!
//! 主机与电机固件之间交换的定长二进制记录（无硬件依赖）
//!
//! ## 模块
//!
//! - `mode`: 模式选择器与调参波形枚举
//! - `command`: 主机 → 设备的 `Command` 记录
//! - `status`: 设备 → 主机的 `Status` 记录
//!
//! ## 字节序与布局
//!
//! 记录布局是与固件之间的兼容性契约，必须逐字节保持一致（包括结构体填充）。
//! 所有多字节字段均为 little-endian，填充字节编码时写 0。
//!
//! ```text
//! Command (32 bytes)
//! 0      4    5     8                      28        32
//! | host_ts | mode | pad | payload (20 bytes) | reserved |
//!
//! Status (40 bytes)
//! 0       4        8       12      16   20     24       28            40
//! | mcu_ts | host_ts | motor | joint | iq | torque | encoder | reserved[3] |
//! ```

pub mod command;
pub mod mode;
pub mod status;

pub use command::{
    COMMAND_SIZE, Command, MotorSetpoint, Reserved, Setpoint, StepperTuning, StepperVelocity,
    Tuning,
};
pub use mode::{ModeDesired, TuningMode};
pub use status::{ReservedFormat, ReservedValue, STATUS_SIZE, Status};

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid record length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: u8 },
}

/// 从 `bytes[offset..offset + 4]` 读取 little-endian u32
///
/// 调用方负责保证长度（记录长度在解码入口处统一检查）。
#[inline]
pub(crate) fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

#[inline]
pub(crate) fn read_f32_le(bytes: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32_le(bytes, offset))
}

#[inline]
pub(crate) fn write_u32_le(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_f32_le(bytes: &mut [u8], offset: usize, value: f32) {
    write_u32_le(bytes, offset, value.to_bits());
}

/// 检查记录长度
pub(crate) fn check_length(bytes: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if bytes.len() < expected {
        return Err(ProtocolError::InvalidLength {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_helpers_roundtrip() {
        let mut buf = [0u8; 8];
        write_u32_le(&mut buf, 4, 0x1234_5678);
        assert_eq!(&buf[4..], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(read_u32_le(&buf, 4), 0x1234_5678);

        write_f32_le(&mut buf, 0, -1.5);
        assert_eq!(read_f32_le(&buf, 0), -1.5);
    }

    #[test]
    fn test_check_length() {
        assert!(check_length(&[0u8; 4], 4).is_ok());
        let err = check_length(&[0u8; 3], 4).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidLength {
                expected: 4,
                actual: 3
            }
        );
        assert_eq!(
            format!("{}", err),
            "Invalid record length: expected 4, got 3"
        );
    }
}
