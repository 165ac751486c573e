//! 设备发现
//!
//! 扫描 sysfs 枚举电机设备节点：
//!
//! - 内核驱动：class 设备名以 `mtr` 或 `usbrt` 开头，节点为 `/dev/<name>`
//! - 用户态驱动：`idVendor=3293`、`idProduct=0100` 的 USB 设备，节点为 `/dev/bus/usb/BBB/DDD`

use crate::identity::read_attr;
use crate::{CharDeviceMotor, MotorTransport, TransportError, UsbBulkMotor};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

const MOTOR_VENDOR_ID: &str = "3293";
const MOTOR_PRODUCT_ID: &str = "0100";
const CLASS_DEVICE_PREFIXES: [&str; 2] = ["usbrt", "mtr"];

/// 驱动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverFlavor {
    /// 内核驱动（字符设备）
    #[default]
    KernelDriver,
    /// 用户态驱动（usbfs + libusb）
    UserSpace,
}

/// 基于 sysfs 的设备枚举
#[derive(Debug, Clone)]
pub struct SysfsDiscovery {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl Default for SysfsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsDiscovery {
    pub fn new() -> Self {
        Self::with_roots("/sys", "/dev")
    }

    /// 指定 sysfs 与 `/dev` 根目录（测试时指向伪造的目录树）
    pub fn with_roots(sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
        }
    }

    pub fn sysfs_root(&self) -> &Path {
        &self.sysfs_root
    }

    /// 枚举设备节点路径（已排序、去重）
    pub fn enumerate(&self, flavor: DriverFlavor) -> Result<Vec<String>, TransportError> {
        let mut paths = match flavor {
            DriverFlavor::KernelDriver => self.enumerate_class_devices()?,
            DriverFlavor::UserSpace => self.enumerate_usb_devices()?,
        };
        paths.sort();
        paths.dedup();
        trace!("Enumerated {} motor device(s) ({:?})", paths.len(), flavor);
        Ok(paths)
    }

    fn enumerate_class_devices(&self) -> Result<Vec<String>, TransportError> {
        let class_root = self.sysfs_root.join("class");
        let mut paths = Vec::new();
        if !class_root.is_dir() {
            return Ok(paths);
        }

        for class in fs::read_dir(&class_root)?.flatten() {
            let Ok(entries) = fs::read_dir(class.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if CLASS_DEVICE_PREFIXES.iter().any(|p| name.starts_with(p)) {
                    paths.push(self.dev_root.join(&name).to_string_lossy().into_owned());
                }
            }
        }
        Ok(paths)
    }

    fn enumerate_usb_devices(&self) -> Result<Vec<String>, TransportError> {
        let usb_root = self.sysfs_root.join("bus/usb/devices");
        let mut paths = Vec::new();
        if !usb_root.is_dir() {
            return Ok(paths);
        }

        for entry in fs::read_dir(&usb_root)?.flatten() {
            let dir = entry.path();
            if read_attr(&dir.join("idVendor")) != MOTOR_VENDOR_ID
                || read_attr(&dir.join("idProduct")) != MOTOR_PRODUCT_ID
            {
                continue;
            }
            let (Ok(bus), Ok(devnum)) = (
                read_attr(&dir.join("busnum")).parse::<u16>(),
                read_attr(&dir.join("devnum")).parse::<u16>(),
            ) else {
                trace!("Skipping {}: missing busnum/devnum", dir.display());
                continue;
            };
            let node = self
                .dev_root
                .join(format!("bus/usb/{:03}/{:03}", bus, devnum));
            paths.push(node.to_string_lossy().into_owned());
        }
        Ok(paths)
    }
}

/// 设备来源
///
/// 注册表通过它枚举并探测设备，测试中可替换为内存实现。
pub trait DeviceSource: Send {
    /// 枚举当前可见的设备节点
    fn enumerate(&self) -> Result<Vec<String>, TransportError>;

    /// 探测设备：解析身份并构造未打开的传输对象
    fn probe(&self, dev_path: &str) -> Result<Box<dyn MotorTransport>, TransportError>;
}

/// 基于 sysfs 的系统设备来源
#[derive(Debug, Clone, Default)]
pub struct SystemDeviceSource {
    discovery: SysfsDiscovery,
    flavor: DriverFlavor,
}

impl SystemDeviceSource {
    pub fn new(flavor: DriverFlavor) -> Self {
        Self {
            discovery: SysfsDiscovery::new(),
            flavor,
        }
    }

    pub fn with_discovery(discovery: SysfsDiscovery, flavor: DriverFlavor) -> Self {
        Self { discovery, flavor }
    }

    pub fn flavor(&self) -> DriverFlavor {
        self.flavor
    }
}

impl DeviceSource for SystemDeviceSource {
    fn enumerate(&self) -> Result<Vec<String>, TransportError> {
        self.discovery.enumerate(self.flavor)
    }

    fn probe(&self, dev_path: &str) -> Result<Box<dyn MotorTransport>, TransportError> {
        let root = self.discovery.sysfs_root();
        Ok(match self.flavor {
            DriverFlavor::KernelDriver => Box::new(CharDeviceMotor::probe_in(root, dev_path)?),
            DriverFlavor::UserSpace => Box::new(UsbBulkMotor::probe_in(root, dev_path)?),
        })
    }
}
