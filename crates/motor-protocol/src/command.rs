//! 主机 → 设备命令记录
//!
//! 固件端的载荷是一块按模式复用的重叠内存。这里用 [`Setpoint`] 枚举显式建模：
//! 载荷与模式永远一同构造、一同编码，不可能出现"模式是 POSITION、载荷却是调参参数"的记录。

use crate::mode::{ModeDesired, TuningMode};
use crate::{
    ProtocolError, check_length, read_f32_le, read_u32_le, write_f32_le, write_u32_le,
};

/// `Command` 线上记录长度（字节）
pub const COMMAND_SIZE: usize = 32;

const HOST_TIMESTAMP_OFFSET: usize = 0;
const MODE_OFFSET: usize = 4;
const PAYLOAD_OFFSET: usize = 8;
const RESERVED_OFFSET: usize = 28;

/// 电流/位置/速度/力矩设定值（基础控制模式的载荷）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorSetpoint {
    pub current: f32,
    pub position: f32,
    pub velocity: f32,
    pub torque: f32,
}

/// 调参波形描述
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tuning {
    pub mode: TuningMode,
    pub amplitude: f32,
    pub frequency: f32,
    pub bias: f32,
}

/// 步进调参：波形描述 + kv
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StepperTuning {
    pub tuning: Tuning,
    pub kv: f32,
}

/// 步进速度：电压 + 速度
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StepperVelocity {
    pub voltage: f32,
    pub velocity: f32,
}

/// 按模式区分的设定值
///
/// 每个变体对应一个 [`ModeDesired`]，变体携带的载荷决定线上 20 字节载荷区的解释方式。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Setpoint {
    #[default]
    Open,
    Damped,
    Current(MotorSetpoint),
    Position(MotorSetpoint),
    Torque(MotorSetpoint),
    Impedance(MotorSetpoint),
    Velocity(MotorSetpoint),
    Voltage(MotorSetpoint),
    PhaseLock(MotorSetpoint),
    CurrentTuning(Tuning),
    PositionTuning(Tuning),
    StepperTuning(StepperTuning),
    StepperVelocity(StepperVelocity),
    Sleep,
    Crash,
    Reset,
}

impl Setpoint {
    /// 对应的模式选择器
    pub fn mode(&self) -> ModeDesired {
        match self {
            Self::Open => ModeDesired::Open,
            Self::Damped => ModeDesired::Damped,
            Self::Current(_) => ModeDesired::Current,
            Self::Position(_) => ModeDesired::Position,
            Self::Torque(_) => ModeDesired::Torque,
            Self::Impedance(_) => ModeDesired::Impedance,
            Self::Velocity(_) => ModeDesired::Velocity,
            Self::Voltage(_) => ModeDesired::Voltage,
            Self::PhaseLock(_) => ModeDesired::PhaseLock,
            Self::CurrentTuning(_) => ModeDesired::CurrentTuning,
            Self::PositionTuning(_) => ModeDesired::PositionTuning,
            Self::StepperTuning(_) => ModeDesired::StepperTuning,
            Self::StepperVelocity(_) => ModeDesired::StepperVelocity,
            Self::Sleep => ModeDesired::Sleep,
            Self::Crash => ModeDesired::Crash,
            Self::Reset => ModeDesired::Reset,
        }
    }

    /// 基础控制模式的设定值（其他模式返回 `None`）
    pub fn motor(&self) -> Option<&MotorSetpoint> {
        match self {
            Self::Current(m)
            | Self::Position(m)
            | Self::Torque(m)
            | Self::Impedance(m)
            | Self::Velocity(m)
            | Self::Voltage(m)
            | Self::PhaseLock(m) => Some(m),
            _ => None,
        }
    }

    /// 基础控制模式设定值的可变引用
    pub fn motor_mut(&mut self) -> Option<&mut MotorSetpoint> {
        match self {
            Self::Current(m)
            | Self::Position(m)
            | Self::Torque(m)
            | Self::Impedance(m)
            | Self::Velocity(m)
            | Self::Voltage(m)
            | Self::PhaseLock(m) => Some(m),
            _ => None,
        }
    }

    /// 用给定模式和基础设定值构造
    ///
    /// 如果模式不携带 [`MotorSetpoint`] 载荷，返回 `None`。
    pub fn with_motor(mode: ModeDesired, motor: MotorSetpoint) -> Option<Self> {
        Some(match mode {
            ModeDesired::Current => Self::Current(motor),
            ModeDesired::Position => Self::Position(motor),
            ModeDesired::Torque => Self::Torque(motor),
            ModeDesired::Impedance => Self::Impedance(motor),
            ModeDesired::Velocity => Self::Velocity(motor),
            ModeDesired::Voltage => Self::Voltage(motor),
            ModeDesired::PhaseLock => Self::PhaseLock(motor),
            _ => return None,
        })
    }

    /// 无载荷模式的设定值
    ///
    /// 如果模式需要载荷，返回 `None`。
    pub fn without_payload(mode: ModeDesired) -> Option<Self> {
        Some(match mode {
            ModeDesired::Open => Self::Open,
            ModeDesired::Damped => Self::Damped,
            ModeDesired::Sleep => Self::Sleep,
            ModeDesired::Crash => Self::Crash,
            ModeDesired::Reset => Self::Reset,
            _ => return None,
        })
    }

    fn encode_payload(&self, payload: &mut [u8]) {
        match self {
            Self::Open | Self::Damped | Self::Sleep | Self::Crash | Self::Reset => {},
            Self::Current(m)
            | Self::Position(m)
            | Self::Torque(m)
            | Self::Impedance(m)
            | Self::Velocity(m)
            | Self::Voltage(m)
            | Self::PhaseLock(m) => {
                write_f32_le(payload, 0, m.current);
                write_f32_le(payload, 4, m.position);
                write_f32_le(payload, 8, m.velocity);
                write_f32_le(payload, 12, m.torque);
            },
            Self::CurrentTuning(t) | Self::PositionTuning(t) => encode_tuning(payload, t),
            Self::StepperTuning(s) => {
                encode_tuning(payload, &s.tuning);
                write_f32_le(payload, 16, s.kv);
            },
            Self::StepperVelocity(s) => {
                write_f32_le(payload, 0, s.voltage);
                write_f32_le(payload, 4, s.velocity);
            },
        }
    }

    fn decode(mode: ModeDesired, payload: &[u8]) -> Result<Self, ProtocolError> {
        let motor = || MotorSetpoint {
            current: read_f32_le(payload, 0),
            position: read_f32_le(payload, 4),
            velocity: read_f32_le(payload, 8),
            torque: read_f32_le(payload, 12),
        };

        Ok(match mode {
            ModeDesired::Open => Self::Open,
            ModeDesired::Damped => Self::Damped,
            ModeDesired::Sleep => Self::Sleep,
            ModeDesired::Crash => Self::Crash,
            ModeDesired::Reset => Self::Reset,
            ModeDesired::Current => Self::Current(motor()),
            ModeDesired::Position => Self::Position(motor()),
            ModeDesired::Torque => Self::Torque(motor()),
            ModeDesired::Impedance => Self::Impedance(motor()),
            ModeDesired::Velocity => Self::Velocity(motor()),
            ModeDesired::Voltage => Self::Voltage(motor()),
            ModeDesired::PhaseLock => Self::PhaseLock(motor()),
            ModeDesired::CurrentTuning => Self::CurrentTuning(decode_tuning(payload)?),
            ModeDesired::PositionTuning => Self::PositionTuning(decode_tuning(payload)?),
            ModeDesired::StepperTuning => Self::StepperTuning(StepperTuning {
                tuning: decode_tuning(payload)?,
                kv: read_f32_le(payload, 16),
            }),
            ModeDesired::StepperVelocity => Self::StepperVelocity(StepperVelocity {
                voltage: read_f32_le(payload, 0),
                velocity: read_f32_le(payload, 4),
            }),
        })
    }
}

// 调参载荷：mode(u8) + 3 字节填充 + amplitude + frequency + bias
fn encode_tuning(payload: &mut [u8], tuning: &Tuning) {
    payload[0] = tuning.mode.into();
    write_f32_le(payload, 4, tuning.amplitude);
    write_f32_le(payload, 8, tuning.frequency);
    write_f32_le(payload, 12, tuning.bias);
}

fn decode_tuning(payload: &[u8]) -> Result<Tuning, ProtocolError> {
    let mode = TuningMode::try_from(payload[0]).map_err(|_| ProtocolError::InvalidValue {
        field: "tuning_mode",
        value: payload[0],
    })?;
    Ok(Tuning {
        mode,
        amplitude: read_f32_le(payload, 4),
        frequency: read_f32_le(payload, 8),
        bias: read_f32_le(payload, 12),
    })
}

/// 保留字段（32 位）
///
/// 固件按需把它当作 `f32` 或原始位使用，记录本身不区分，由调用方显式选择。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reserved(u32);

impl Reserved {
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn from_f32(value: f32) -> Self {
        Self(value.to_bits())
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn as_f32(self) -> f32 {
        f32::from_bits(self.0)
    }
}

/// 主机 → 设备命令
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Command {
    /// 主机时间戳（命令计数器，单调递增）
    pub host_timestamp: u32,
    /// 模式 + 载荷
    pub setpoint: Setpoint,
    /// 保留字段
    pub reserved: Reserved,
}

impl Command {
    /// 创建指定设定值的命令（时间戳为 0，由 MotorManager 自动计数时填充）
    pub fn new(setpoint: Setpoint) -> Self {
        Self {
            host_timestamp: 0,
            setpoint,
            reserved: Reserved::default(),
        }
    }

    /// 模式选择器
    pub fn mode(&self) -> ModeDesired {
        self.setpoint.mode()
    }

    /// 编码为线上格式（填充字节为 0）
    pub fn to_bytes(&self) -> [u8; COMMAND_SIZE] {
        let mut bytes = [0u8; COMMAND_SIZE];
        write_u32_le(&mut bytes, HOST_TIMESTAMP_OFFSET, self.host_timestamp);
        bytes[MODE_OFFSET] = self.mode().as_u8();
        self.setpoint
            .encode_payload(&mut bytes[PAYLOAD_OFFSET..RESERVED_OFFSET]);
        write_u32_le(&mut bytes, RESERVED_OFFSET, self.reserved.bits());
        bytes
    }

    /// 从线上格式解码
    ///
    /// # 错误
    /// - `InvalidLength`: 输入不足 [`COMMAND_SIZE`] 字节
    /// - `InvalidValue`: 未知模式字节或调参波形字节
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_length(bytes, COMMAND_SIZE)?;

        let mode_byte = bytes[MODE_OFFSET];
        let mode = ModeDesired::try_from(mode_byte).map_err(|_| ProtocolError::InvalidValue {
            field: "mode_desired",
            value: mode_byte,
        })?;
        let setpoint = Setpoint::decode(mode, &bytes[PAYLOAD_OFFSET..RESERVED_OFFSET])?;

        Ok(Self {
            host_timestamp: read_u32_le(bytes, HOST_TIMESTAMP_OFFSET),
            setpoint,
            reserved: Reserved::from_bits(read_u32_le(bytes, RESERVED_OFFSET)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(position: f32) -> Setpoint {
        Setpoint::Position(MotorSetpoint {
            position,
            ..Default::default()
        })
    }

    #[test]
    fn test_position_command_layout() {
        let cmd = Command {
            host_timestamp: 0x0102_0304,
            setpoint: Setpoint::Position(MotorSetpoint {
                current: 1.0,
                position: 2.0,
                velocity: 3.0,
                torque: 4.0,
            }),
            reserved: Reserved::from_bits(0xDEAD_BEEF),
        };
        let bytes = cmd.to_bytes();

        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(bytes[4], ModeDesired::Position.as_u8());
        // 模式字节之后的 3 字节填充必须为 0
        assert_eq!(&bytes[5..8], &[0, 0, 0]);
        assert_eq!(&bytes[8..12], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[12..16], &2.0f32.to_le_bytes());
        assert_eq!(&bytes[16..20], &3.0f32.to_le_bytes());
        assert_eq!(&bytes[20..24], &4.0f32.to_le_bytes());
        assert_eq!(&bytes[24..28], &[0, 0, 0, 0]);
        assert_eq!(&bytes[28..32], &0xDEAD_BEEFu32.to_le_bytes());
    }

    #[test]
    fn test_stepper_tuning_layout() {
        let cmd = Command::new(Setpoint::StepperTuning(StepperTuning {
            tuning: Tuning {
                mode: TuningMode::Square,
                amplitude: 0.5,
                frequency: 10.0,
                bias: -0.25,
            },
            kv: 7.0,
        }));
        let bytes = cmd.to_bytes();

        assert_eq!(bytes[4], 11);
        assert_eq!(bytes[8], TuningMode::Square as u8);
        assert_eq!(&bytes[9..12], &[0, 0, 0]);
        assert_eq!(&bytes[12..16], &0.5f32.to_le_bytes());
        assert_eq!(&bytes[16..20], &10.0f32.to_le_bytes());
        assert_eq!(&bytes[20..24], &(-0.25f32).to_le_bytes());
        assert_eq!(&bytes[24..28], &7.0f32.to_le_bytes());
    }

    #[test]
    fn test_payloadless_modes_encode_zero_payload() {
        for setpoint in [Setpoint::Open, Setpoint::Damped, Setpoint::Sleep, Setpoint::Reset] {
            let bytes = Command::new(setpoint).to_bytes();
            assert!(bytes[8..28].iter().all(|&b| b == 0), "{:?}", setpoint);
        }
    }

    #[test]
    fn test_decode_matches_encode() {
        let cmd = Command {
            host_timestamp: 42,
            setpoint: Setpoint::StepperVelocity(StepperVelocity {
                voltage: 12.0,
                velocity: -3.5,
            }),
            reserved: Reserved::from_f32(200.0),
        };
        let decoded = Command::from_bytes(&cmd.to_bytes()).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(decoded.reserved.as_f32(), 200.0);
    }

    #[test]
    fn test_decode_rejects_unknown_mode() {
        let mut bytes = Command::new(position(1.0)).to_bytes();
        bytes[4] = 100;
        let err = Command::from_bytes(&bytes).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidValue {
                field: "mode_desired",
                value: 100
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_tuning_mode() {
        let mut bytes = Command::new(Setpoint::CurrentTuning(Tuning::default())).to_bytes();
        bytes[8] = 9;
        assert!(matches!(
            Command::from_bytes(&bytes),
            Err(ProtocolError::InvalidValue {
                field: "tuning_mode",
                ..
            })
        ));
    }

    #[test]
    fn test_decode_rejects_short_input() {
        let bytes = Command::default().to_bytes();
        assert!(matches!(
            Command::from_bytes(&bytes[..COMMAND_SIZE - 1]),
            Err(ProtocolError::InvalidLength {
                expected: COMMAND_SIZE,
                ..
            })
        ));
    }

    #[test]
    fn test_motor_accessors_follow_mode() {
        let mut sp = position(1.0);
        sp.motor_mut().unwrap().velocity = 2.0;
        assert_eq!(sp.motor().unwrap().velocity, 2.0);

        let mut tuning = Setpoint::PositionTuning(Tuning::default());
        assert!(tuning.motor().is_none());
        assert!(tuning.motor_mut().is_none());
    }

    #[test]
    fn test_constructors_refuse_mismatched_modes() {
        assert!(Setpoint::with_motor(ModeDesired::Velocity, MotorSetpoint::default()).is_some());
        assert!(Setpoint::with_motor(ModeDesired::StepperTuning, MotorSetpoint::default()).is_none());
        assert_eq!(Setpoint::without_payload(ModeDesired::Sleep), Some(Setpoint::Sleep));
        assert!(Setpoint::without_payload(ModeDesired::Current).is_none());
        assert_eq!(
            Setpoint::with_motor(ModeDesired::PhaseLock, MotorSetpoint::default())
                .unwrap()
                .mode(),
            ModeDesired::PhaseLock
        );
    }
}
