//! # Motor Transport
//!
//! 电机设备传输层，为上层提供统一的读写接口。
//!
//! ## 后端
//!
//! - `chardev`: 内核驱动创建的字符设备节点（`/dev/mtr*`、`/dev/usbrt*`）
//! - `usb`: 用户态 USB bulk 传输（`/dev/bus/usb/BBB/DDD`，基于 `rusb`）
//! - `simulated`: 无硬件的模拟电机
//!
//! 设备发现见 `discovery`，设备身份解析见 `identity`。

use motor_protocol::{COMMAND_SIZE, Command, ProtocolError, STATUS_SIZE, Status};
use std::time::Duration;
use thiserror::Error;

pub mod chardev;
pub mod discovery;
pub mod identity;
pub mod simulated;
pub mod usb;

pub use chardev::CharDeviceMotor;
pub use discovery::{DeviceSource, DriverFlavor, SysfsDiscovery, SystemDeviceSource};
pub use identity::DeviceIdentity;
pub use simulated::SimulatedMotor;
pub use usb::UsbBulkMotor;

/// 文本接口单次回复的最大长度（字节）
pub const TEXT_REPLY_SIZE: usize = 64;

// text_flush 最多读取的次数，避免设备持续返回数据时死循环
const MAX_FLUSH_READS: usize = 16;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
    #[error("Short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },
    #[error("Write timeout")]
    WriteTimeout,
    #[error("Invalid device path: {0}")]
    InvalidPath(String),
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Device not open: {0}")]
    NotOpen(String),
    #[error("Text API unavailable for {0}")]
    TextUnavailable(String),
}

/// 传输后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    CharDevice,
    UsbBulk,
    Simulated,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CharDevice => "chardev",
            Self::UsbBulk => "usb",
            Self::Simulated => "simulated",
        }
    }
}

/// 电机传输接口
///
/// 所有后端都以字节缓冲区为单位读写一条完整记录：`read` 读 [`STATUS_SIZE`] 字节，
/// `write` 写 [`COMMAND_SIZE`] 字节。返回 0 表示"暂无数据"（非阻塞读无数据或读超时），
/// 不是错误。
pub trait MotorTransport: Send {
    fn identity(&self) -> &DeviceIdentity;

    fn kind(&self) -> TransportKind;

    fn is_open(&self) -> bool;

    /// 打开设备
    fn open(&mut self) -> Result<(), TransportError>;

    /// 关闭设备（已关闭时为空操作）
    fn close(&mut self) -> Result<(), TransportError>;

    /// 阻塞读（有界超时）
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// 非阻塞读，无数据时返回 0
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// 等待设备可读，最多等待 `timeout`；超时返回 `Ok(false)`
    ///
    /// 没有可等待句柄的后端（USB bulk、模拟设备）总是就绪。
    fn poll(&self, _timeout: Duration) -> Result<bool, TransportError> {
        Ok(true)
    }

    /// 向文本接口写入一条请求
    fn text_write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// 从文本接口读取回复，无回复时返回 0
    fn text_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// 读取一条状态记录
    ///
    /// 返回 `Ok(false)` 表示暂无数据，此时 `status` 保持不变。
    /// 不完整的记录视为错误，同样不会覆盖 `status`。
    fn read_status(&mut self, status: &mut Status) -> Result<bool, TransportError> {
        let mut buf = [0u8; STATUS_SIZE];
        match self.read(&mut buf)? {
            0 => Ok(false),
            n if n < STATUS_SIZE => Err(TransportError::ShortRead {
                expected: STATUS_SIZE,
                actual: n,
            }),
            _ => {
                *status = Status::from_bytes(&buf)?;
                Ok(true)
            },
        }
    }

    /// 写入一条命令记录
    fn write_command(&mut self, command: &Command) -> Result<(), TransportError> {
        let bytes = command.to_bytes();
        let written = self.write(&bytes)?;
        if written < COMMAND_SIZE {
            return Err(TransportError::ShortWrite {
                expected: COMMAND_SIZE,
                actual: written,
            });
        }
        Ok(())
    }

    /// 非阻塞预取一条状态记录
    fn prefetch(&mut self) -> Result<Option<Status>, TransportError> {
        let mut buf = [0u8; STATUS_SIZE];
        match self.try_read(&mut buf)? {
            0 => Ok(None),
            n if n < STATUS_SIZE => Err(TransportError::ShortRead {
                expected: STATUS_SIZE,
                actual: n,
            }),
            _ => Ok(Some(Status::from_bytes(&buf)?)),
        }
    }

    /// 丢弃文本接口中残留的回复
    fn text_flush(&mut self) -> Result<(), TransportError> {
        let mut buf = [0u8; TEXT_REPLY_SIZE];
        for _ in 0..MAX_FLUSH_READS {
            if self.text_read(&mut buf)? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// 读取参数：写入参数名，返回设备回复
    fn text_get(&mut self, name: &str) -> Result<String, TransportError> {
        self.text_flush()?;
        self.text_write(name.as_bytes())?;
        let mut buf = [0u8; TEXT_REPLY_SIZE];
        let n = self.text_read(&mut buf)?;
        Ok(reply_to_string(&buf[..n]))
    }

    /// 设置参数：写入 `name=value`，返回设备回复
    fn text_set(&mut self, name: &str, value: &str) -> Result<String, TransportError> {
        self.text_flush()?;
        let request = format!("{}={}", name, value);
        self.text_write(request.as_bytes())?;
        let mut buf = [0u8; TEXT_REPLY_SIZE];
        let n = self.text_read(&mut buf)?;
        Ok(reply_to_string(&buf[..n]))
    }
}

/// 回复截断到第一个 NUL，去掉行尾换行
pub(crate) fn reply_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
        .trim_end_matches(['\r', '\n'])
        .to_string()
}
