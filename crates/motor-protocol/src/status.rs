//! 设备 → 主机状态记录

use crate::{ProtocolError, check_length, read_f32_le, read_u32_le, write_f32_le, write_u32_le};

/// `Status` 线上记录长度（字节）
pub const STATUS_SIZE: usize = 40;

const RESERVED_OFFSET: usize = 28;
const RESERVED_SLOTS: usize = 3;

/// 设备状态
///
/// 只在读取成功时被整块覆盖，失败或空读保留上一次的值。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Status {
    /// MCU 时钟
    pub mcu_timestamp: u32,
    /// 设备最后收到的主机时间戳（命令计数）
    pub host_timestamp_received: u32,
    pub motor_position: f32,
    pub joint_position: f32,
    pub iq: f32,
    pub torque: f32,
    /// 电机编码器原始计数
    pub motor_encoder: i32,
    /// 保留字段（原始 32 位字，解释方式由调用方选择）
    pub reserved: [u32; RESERVED_SLOTS],
}

/// 保留字段的解释方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReservedFormat {
    /// slot 0 作为 u32
    #[default]
    Uint32,
    /// slot 0、1 作为两个 f32
    FloatPair,
}

/// 按 [`ReservedFormat`] 解释后的保留字段
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReservedValue {
    Uint32(u32),
    FloatPair(f32, f32),
}

impl Status {
    /// 按调用方选择的方式解释保留字段
    pub fn reserved(&self, format: ReservedFormat) -> ReservedValue {
        match format {
            ReservedFormat::Uint32 => ReservedValue::Uint32(self.reserved[0]),
            ReservedFormat::FloatPair => ReservedValue::FloatPair(
                f32::from_bits(self.reserved[0]),
                f32::from_bits(self.reserved[1]),
            ),
        }
    }

    pub fn to_bytes(&self) -> [u8; STATUS_SIZE] {
        let mut bytes = [0u8; STATUS_SIZE];
        write_u32_le(&mut bytes, 0, self.mcu_timestamp);
        write_u32_le(&mut bytes, 4, self.host_timestamp_received);
        write_f32_le(&mut bytes, 8, self.motor_position);
        write_f32_le(&mut bytes, 12, self.joint_position);
        write_f32_le(&mut bytes, 16, self.iq);
        write_f32_le(&mut bytes, 20, self.torque);
        bytes[24..28].copy_from_slice(&self.motor_encoder.to_le_bytes());
        for (i, word) in self.reserved.iter().enumerate() {
            write_u32_le(&mut bytes, RESERVED_OFFSET + i * 4, *word);
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_length(bytes, STATUS_SIZE)?;

        let mut reserved = [0u32; RESERVED_SLOTS];
        for (i, word) in reserved.iter_mut().enumerate() {
            *word = read_u32_le(bytes, RESERVED_OFFSET + i * 4);
        }

        Ok(Self {
            mcu_timestamp: read_u32_le(bytes, 0),
            host_timestamp_received: read_u32_le(bytes, 4),
            motor_position: read_f32_le(bytes, 8),
            joint_position: read_f32_le(bytes, 12),
            iq: read_f32_le(bytes, 16),
            torque: read_f32_le(bytes, 20),
            motor_encoder: read_u32_le(bytes, 24) as i32,
            reserved,
        })
    }
}
