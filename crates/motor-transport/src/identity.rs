//! 设备身份解析
//!
//! 从设备节点的设备号定位 sysfs 目录（`/sys/dev/char/MAJOR:MINOR`），
//! 再向上找到所属 USB 设备目录读取名称、序列号和固件版本。

use crate::TransportError;
use nix::sys::stat::{major, minor};
use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

/// 设备身份（探测时确定，之后不变）
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceIdentity {
    /// 设备名称（USB 接口字符串）
    pub name: String,
    pub serial_number: String,
    /// 稳定的总线路径，如 `1-1.2`（重插后不变，用于重连）
    pub base_path: String,
    /// 设备节点路径，如 `/dev/mtr0`
    pub dev_path: String,
    /// 固件版本字符串（USB configuration 字符串）
    pub version: String,
}

impl DeviceIdentity {
    /// 版本号的简短形式（去掉 `-g<hash>` 后缀）
    pub fn short_version(&self) -> &str {
        match self.version.find("-g") {
            Some(pos) => &self.version[..pos],
            None => &self.version,
        }
    }
}

/// 已解析的 sysfs 位置
#[derive(Debug, Clone)]
pub struct SysfsLocation {
    /// 设备节点对应的 sysfs 目录（规范化后）
    pub syspath: PathBuf,
    pub identity: DeviceIdentity,
}

/// 通过设备节点解析身份
///
/// `sysfs_root` 通常为 `/sys`。
pub fn resolve(sysfs_root: &Path, dev_path: &str) -> Result<SysfsLocation, TransportError> {
    let metadata = fs::metadata(dev_path)?;
    if !metadata.file_type().is_char_device() {
        return Err(TransportError::InvalidPath(format!(
            "{} is not a character device",
            dev_path
        )));
    }

    let rdev = metadata.rdev();
    let link = sysfs_root
        .join("dev/char")
        .join(format!("{}:{}", major(rdev), minor(rdev)));
    let syspath = fs::canonicalize(&link).map_err(|e| {
        TransportError::InvalidPath(format!("{}: {} ({})", dev_path, link.display(), e))
    })?;

    let identity = identity_from_syspath(&syspath, dev_path);
    Ok(SysfsLocation { syspath, identity })
}

/// 从 sysfs 目录读取身份属性
///
/// 向上查找第一个包含 `idVendor` 的目录作为 USB 设备目录：用户态驱动时就是 `syspath` 本身，
/// 内核驱动时是 class 设备所在接口的父目录。
pub fn identity_from_syspath(syspath: &Path, dev_path: &str) -> DeviceIdentity {
    let usb_dir = syspath
        .ancestors()
        .find(|dir| dir.join("idVendor").is_file())
        .unwrap_or(syspath);
    let sysname = usb_dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    DeviceIdentity {
        name: read_attr(&usb_dir.join(format!("{}:1.0/interface", sysname))),
        serial_number: read_attr(&usb_dir.join("serial")),
        base_path: sysname,
        dev_path: dev_path.to_string(),
        version: read_attr(&usb_dir.join("configuration")),
    }
}

/// 读取 sysfs 属性，缺失或不可读时返回空串
pub(crate) fn read_attr(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_default()
}
