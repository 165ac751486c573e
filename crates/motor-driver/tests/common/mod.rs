//! 测试用内存设备来源
//!
//! 每个设备带一个故障开关：打开后所有读写、poll 和 close 都返回 I/O 错误（模拟拔线）。

#![allow(dead_code)]

use motor_driver::MotorManager;
use motor_protocol::{COMMAND_SIZE, Command, STATUS_SIZE, Status};
use motor_transport::{
    DeviceIdentity, DeviceSource, MotorTransport, TransportError, TransportKind,
};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 一个虚拟设备的共享状态（跨重新探测保留）
#[derive(Clone)]
pub struct FakeDevice {
    pub identity: DeviceIdentity,
    pub fail: Arc<AtomicBool>,
    pub opens: Arc<AtomicUsize>,
    pub writes: Arc<AtomicUsize>,
}

impl FakeDevice {
    pub fn new(name: &str, serial: &str, base_path: &str) -> Self {
        Self {
            identity: DeviceIdentity {
                name: name.to_string(),
                serial_number: serial.to_string(),
                base_path: base_path.to_string(),
                dev_path: format!("/dev/fake/{}", base_path),
                version: "1.0.0-g1234".to_string(),
            },
            fail: Arc::new(AtomicBool::new(false)),
            opens: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

/// 虚拟设备传输：状态回显最近一次命令的计数
pub struct FakeMotor {
    device: FakeDevice,
    open: bool,
    last_command: Command,
    mcu_timestamp: u32,
}

impl FakeMotor {
    fn new(device: FakeDevice) -> Self {
        Self {
            device,
            open: false,
            last_command: Command::default(),
            mcu_timestamp: 0,
        }
    }

    fn check(&self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen(self.device.identity.name.clone()));
        }
        if self.device.fail.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged").into());
        }
        Ok(())
    }
}

impl MotorTransport for FakeMotor {
    fn identity(&self) -> &DeviceIdentity {
        &self.device.identity
    }

    fn kind(&self) -> TransportKind {
        TransportKind::CharDevice
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.open = true;
        self.device.opens.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        if self.device.fail.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged").into());
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.check()?;
        self.mcu_timestamp += 1;
        let status = Status {
            mcu_timestamp: self.mcu_timestamp,
            host_timestamp_received: self.last_command.host_timestamp,
            ..Default::default()
        };
        let n = buf.len().min(STATUS_SIZE);
        buf[..n].copy_from_slice(&status.to_bytes()[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.check()?;
        self.last_command = Command::from_bytes(buf)?;
        self.device.writes.fetch_add(1, Ordering::Relaxed);
        Ok(COMMAND_SIZE)
    }

    fn try_read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
        self.check()?;
        Ok(0)
    }

    fn poll(&self, _timeout: Duration) -> Result<bool, TransportError> {
        self.check()?;
        Ok(true)
    }

    fn text_write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.check()?;
        Ok(data.len())
    }

    fn text_read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
        self.check()?;
        Ok(0)
    }
}

/// 内存设备来源
#[derive(Clone, Default)]
pub struct FakeSource {
    devices: Arc<Mutex<Vec<FakeDevice>>>,
}

impl FakeSource {
    pub fn new(devices: Vec<FakeDevice>) -> Self {
        Self {
            devices: Arc::new(Mutex::new(devices)),
        }
    }
}

impl DeviceSource for FakeSource {
    fn enumerate(&self) -> Result<Vec<String>, TransportError> {
        Ok(self
            .devices
            .lock()
            .iter()
            .map(|d| d.identity.dev_path.clone())
            .collect())
    }

    fn probe(&self, dev_path: &str) -> Result<Box<dyn MotorTransport>, TransportError> {
        self.devices
            .lock()
            .iter()
            .find(|d| d.identity.dev_path == dev_path)
            .map(|d| Box::new(FakeMotor::new(d.clone())) as Box<dyn MotorTransport>)
            .ok_or_else(|| TransportError::DeviceNotFound(dev_path.to_string()))
    }
}

/// 三个设备：m0/m1/m2，总线路径 1-1/1-2/1-3
pub fn three_devices() -> Vec<FakeDevice> {
    (0..3)
        .map(|i| FakeDevice::new(&format!("m{}", i), &format!("SN{}", i), &format!("1-{}", i + 1)))
        .collect()
}

/// 绑定全部虚拟设备的注册表
pub fn manager_with(devices: &[FakeDevice]) -> MotorManager {
    let mut manager = MotorManager::new(Box::new(FakeSource::new(devices.to_vec())));
    manager.get_connected_motors().unwrap();
    manager
}
