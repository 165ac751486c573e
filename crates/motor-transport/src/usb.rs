//! 用户态 USB bulk 后端
//!
//! 不依赖内核驱动，直接通过 libusb（`rusb`）对 usbfs 节点 `/dev/bus/usb/BBB/DDD`
//! 所对应的设备做 bulk 传输。打开时如果内核驱动已绑定接口，先 detach 再 claim。

use crate::identity::{self, DeviceIdentity};
use crate::{MotorTransport, TransportError, TransportKind};
use rusb::{DeviceHandle, GlobalContext};
use std::path::Path;
use std::time::Duration;
use tracing::{trace, warn};

const INTERFACE_NUMBER: u8 = 0;
/// 记录传输端点（endpoint 2）
const ENDPOINT_IN: u8 = 0x82;
const ENDPOINT_OUT: u8 = 0x02;
/// 文本接口端点（endpoint 1）
const TEXT_ENDPOINT_IN: u8 = 0x81;
const TEXT_ENDPOINT_OUT: u8 = 0x01;

const TRANSFER_TIMEOUT: Duration = Duration::from_millis(100);
const TRY_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// 解析 usbfs 路径中的总线号和设备地址
///
/// 只看最后两级路径：`/dev/bus/usb/001/007` → `(1, 7)`。
pub fn parse_usbfs_path(path: &str) -> Result<(u8, u8), TransportError> {
    let invalid = || TransportError::InvalidPath(format!("{} is not a usbfs device node", path));

    let mut parts = path.trim_end_matches('/').rsplit('/');
    let address = parts.next().ok_or_else(invalid)?;
    let bus = parts.next().ok_or_else(invalid)?;
    let bus = bus.parse::<u8>().map_err(|_| invalid())?;
    let address = address.parse::<u8>().map_err(|_| invalid())?;
    Ok((bus, address))
}

/// USB bulk 电机
pub struct UsbBulkMotor {
    identity: DeviceIdentity,
    bus: u8,
    address: u8,
    handle: Option<DeviceHandle<GlobalContext>>,
    /// 打开时是否 detach 过内核驱动（关闭时据此重新 attach）
    kernel_driver_detached: bool,
}

impl UsbBulkMotor {
    pub fn new(identity: DeviceIdentity) -> Result<Self, TransportError> {
        let (bus, address) = parse_usbfs_path(&identity.dev_path)?;
        Ok(Self {
            identity,
            bus,
            address,
            handle: None,
            kernel_driver_detached: false,
        })
    }

    /// 解析设备身份（不打开设备）
    pub fn probe(dev_path: &str) -> Result<Self, TransportError> {
        Self::probe_in(Path::new("/sys"), dev_path)
    }

    pub fn probe_in(sysfs_root: &Path, dev_path: &str) -> Result<Self, TransportError> {
        let location = identity::resolve(sysfs_root, dev_path)?;
        Self::new(location.identity)
    }

    pub fn bus_address(&self) -> (u8, u8) {
        (self.bus, self.address)
    }

    fn handle(&self) -> Result<&DeviceHandle<GlobalContext>, TransportError> {
        self.handle
            .as_ref()
            .ok_or_else(|| TransportError::NotOpen(self.identity.dev_path.clone()))
    }

    fn bulk_read(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        match self.handle()?.read_bulk(endpoint, buf, timeout) {
            Ok(n) => Ok(n),
            Err(rusb::Error::Timeout) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn bulk_write(&self, endpoint: u8, buf: &[u8]) -> Result<usize, TransportError> {
        match self.handle()?.write_bulk(endpoint, buf, TRANSFER_TIMEOUT) {
            Ok(n) => Ok(n),
            Err(rusb::Error::Timeout) => Err(TransportError::WriteTimeout),
            Err(e) => Err(e.into()),
        }
    }
}

impl MotorTransport for UsbBulkMotor {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn kind(&self) -> TransportKind {
        TransportKind::UsbBulk
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn open(&mut self) -> Result<(), TransportError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let device = rusb::devices()?
            .iter()
            .find(|d| d.bus_number() == self.bus && d.address() == self.address)
            .ok_or_else(|| TransportError::DeviceNotFound(self.identity.dev_path.clone()))?;
        let mut handle = device.open()?;

        // 接口已被内核驱动占用时先接管
        let mut detached = false;
        if handle.kernel_driver_active(INTERFACE_NUMBER).unwrap_or(false) {
            handle.detach_kernel_driver(INTERFACE_NUMBER)?;
            detached = true;
        }
        if let Err(e) = handle.claim_interface(INTERFACE_NUMBER) {
            if detached {
                let _ = handle.attach_kernel_driver(INTERFACE_NUMBER);
            }
            return Err(e.into());
        }

        trace!(
            "Claimed USB interface {} on {:03}/{:03}",
            INTERFACE_NUMBER, self.bus, self.address
        );
        self.handle = Some(handle);
        self.kernel_driver_detached = detached;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        let released = handle.release_interface(INTERFACE_NUMBER);
        if self.kernel_driver_detached {
            self.kernel_driver_detached = false;
            if let Err(e) = handle.attach_kernel_driver(INTERFACE_NUMBER) {
                warn!(
                    "Failed to re-attach kernel driver for {}: {}",
                    self.identity.dev_path, e
                );
            }
        }
        trace!("[Release] USB interface released on {}", self.identity.dev_path);
        released.map_err(TransportError::from)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.bulk_read(ENDPOINT_IN, buf, TRANSFER_TIMEOUT)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.bulk_write(ENDPOINT_OUT, buf)
    }

    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.bulk_read(ENDPOINT_IN, buf, TRY_READ_TIMEOUT)
    }

    fn text_write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.bulk_write(TEXT_ENDPOINT_OUT, data)
    }

    fn text_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.bulk_read(TEXT_ENDPOINT_IN, buf, TRANSFER_TIMEOUT)
    }
}

impl Drop for UsbBulkMotor {
    fn drop(&mut self) {
        // 即使设备已断开也不能 panic
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_usbfs_path() {
        assert_eq!(parse_usbfs_path("/dev/bus/usb/001/007").unwrap(), (1, 7));
        assert_eq!(parse_usbfs_path("/dev/bus/usb/003/127/").unwrap(), (3, 127));
        assert!(matches!(
            parse_usbfs_path("/dev/mtr0"),
            Err(TransportError::InvalidPath(_))
        ));
        assert!(parse_usbfs_path("007").is_err());
    }

    #[test]
    fn test_unopened_motor_reports_not_open() {
        let identity = DeviceIdentity {
            dev_path: "/dev/bus/usb/001/002".to_string(),
            ..Default::default()
        };
        let mut motor = UsbBulkMotor::new(identity).unwrap();
        assert_eq!(motor.bus_address(), (1, 2));
        assert!(!motor.is_open());

        let mut buf = [0u8; 40];
        assert!(matches!(motor.read(&mut buf), Err(TransportError::NotOpen(_))));
        assert!(matches!(motor.write(&buf), Err(TransportError::NotOpen(_))));
        // bulk 传输没有可等待的句柄，poll 总是就绪
        assert!(motor.poll(std::time::Duration::ZERO).unwrap());
        // 未打开时 close 是空操作
        motor.close().unwrap();
    }
}
