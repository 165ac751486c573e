//! 模式选择器定义
//!
//! 数值与固件一一对应，不可重排。

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 电机模式选择器（`Command` 第 4 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ModeDesired {
    /// 开环，输出关闭（默认）
    #[default]
    Open = 0,
    /// 阻尼
    Damped = 1,
    /// 电流控制
    Current = 2,
    /// 位置控制
    Position = 3,
    /// 力矩控制
    Torque = 4,
    /// 阻抗控制
    Impedance = 5,
    /// 速度控制
    Velocity = 6,
    /// 电流环调参
    CurrentTuning = 7,
    /// 位置环调参
    PositionTuning = 8,
    /// 电压控制
    Voltage = 9,
    /// 相位锁定
    PhaseLock = 10,
    /// 步进调参
    StepperTuning = 11,
    /// 步进速度
    StepperVelocity = 12,
    /// 休眠
    Sleep = 253,
    /// 故意触发固件崩溃（诊断用）
    Crash = 254,
    /// 复位 MCU
    Reset = 255,
}

impl ModeDesired {
    /// 转换为 u8
    pub fn as_u8(self) -> u8 {
        self.into()
    }

    /// 是否为调参模式
    pub fn is_tuning(self) -> bool {
        matches!(
            self,
            Self::CurrentTuning | Self::PositionTuning | Self::StepperTuning
        )
    }
}

/// 调参波形（调参模式载荷的第一个字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum TuningMode {
    #[default]
    Sine = 0,
    Square = 1,
    Triangle = 2,
    Chirp = 3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_values_are_stable() {
        assert_eq!(ModeDesired::Open.as_u8(), 0);
        assert_eq!(ModeDesired::Velocity.as_u8(), 6);
        assert_eq!(ModeDesired::StepperVelocity.as_u8(), 12);
        assert_eq!(ModeDesired::Sleep.as_u8(), 253);
        assert_eq!(ModeDesired::Reset.as_u8(), 255);
    }

    #[test]
    fn test_mode_try_from() {
        assert_eq!(ModeDesired::try_from(3u8).unwrap(), ModeDesired::Position);
        assert!(ModeDesired::try_from(13u8).is_err());
        assert!(ModeDesired::try_from(200u8).is_err());
    }

    #[test]
    fn test_is_tuning() {
        assert!(ModeDesired::CurrentTuning.is_tuning());
        assert!(ModeDesired::StepperTuning.is_tuning());
        assert!(!ModeDesired::StepperVelocity.is_tuning());
        assert!(!ModeDesired::Position.is_tuning());
    }

    #[test]
    fn test_tuning_mode_try_from() {
        assert_eq!(TuningMode::try_from(3u8).unwrap(), TuningMode::Chirp);
        assert!(TuningMode::try_from(4u8).is_err());
    }
}
