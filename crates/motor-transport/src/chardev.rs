//! 内核驱动字符设备后端
//!
//! 设备节点由内核驱动创建，一次 `read`/`write` 对应一条完整记录。
//! 文本接口通过 sysfs 的 `text_api` 属性访问，每次操作重新打开（sysfs 属性只有重新打开才会刷新）。

use crate::identity::{self, DeviceIdentity};
use crate::{MotorTransport, TransportError, TransportKind};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{trace, warn};

const TEXT_API_ATTR: &str = "text_api";

/// 字符设备电机
pub struct CharDeviceMotor {
    identity: DeviceIdentity,
    /// 设备节点对应的 sysfs 目录（文本接口所在位置）
    sysfs_dir: Option<PathBuf>,
    file: Option<File>,
}

impl CharDeviceMotor {
    pub fn new(identity: DeviceIdentity, sysfs_dir: Option<PathBuf>) -> Self {
        Self {
            identity,
            sysfs_dir,
            file: None,
        }
    }

    /// 解析设备身份（不打开设备）
    pub fn probe(dev_path: &str) -> Result<Self, TransportError> {
        Self::probe_in(Path::new("/sys"), dev_path)
    }

    pub fn probe_in(sysfs_root: &Path, dev_path: &str) -> Result<Self, TransportError> {
        let location = identity::resolve(sysfs_root, dev_path)?;
        Ok(Self::new(location.identity, Some(location.syspath)))
    }

    fn file(&mut self) -> Result<&mut File, TransportError> {
        let dev_path = &self.identity.dev_path;
        self.file
            .as_mut()
            .ok_or_else(|| TransportError::NotOpen(dev_path.clone()))
    }

    fn text_api_path(&self) -> Result<PathBuf, TransportError> {
        self.sysfs_dir
            .as_ref()
            .map(|dir| dir.join(TEXT_API_ATTR))
            .ok_or_else(|| TransportError::TextUnavailable(self.identity.dev_path.clone()))
    }
}

/// 读超时和"暂无数据"都算空读
fn is_empty_read(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(libc::ETIMEDOUT)
}

fn get_flags(fd: libc::c_int) -> io::Result<libc::c_int> {
    // SAFETY: fd 来自仍然存活的 File
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags)
}

fn set_flags(fd: libc::c_int, flags: libc::c_int) -> io::Result<()> {
    // SAFETY: 同上
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// 合并非阻塞读和恢复标志的结果
fn finish_try_read(
    dev_path: &str,
    read: io::Result<usize>,
    restored: io::Result<()>,
) -> Result<usize, TransportError> {
    if let Err(e) = restored {
        warn!("Failed to restore blocking mode on {}: {}", dev_path, e);
    }
    match read {
        Ok(n) => Ok(n),
        Err(e) if is_empty_read(&e) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

impl MotorTransport for CharDeviceMotor {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn kind(&self) -> TransportKind {
        TransportKind::CharDevice
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn open(&mut self) -> Result<(), TransportError> {
        if self.file.is_some() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.identity.dev_path)?;
        trace!("Opened char device {}", self.identity.dev_path);
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.file.take().is_some() {
            trace!("Closed char device {}", self.identity.dev_path);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.file()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_empty_read(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        Ok(self.file()?.write(buf)?)
    }

    /// 临时设置 `O_NONBLOCK` 读取，无论读取结果如何都恢复原标志
    ///
    /// 恢复标志失败只记录告警，已经读到的数据照常返回。
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let file = self.file()?;
        let fd = file.as_raw_fd();
        let saved = get_flags(fd)?;
        set_flags(fd, saved | libc::O_NONBLOCK)?;

        let result = file.read(buf);
        let restored = set_flags(fd, saved);
        finish_try_read(&self.identity.dev_path, result, restored)
    }

    fn poll(&self, timeout: Duration) -> Result<bool, TransportError> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| TransportError::NotOpen(self.identity.dev_path.clone()))?;
        let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
        // PollTimeout 以毫秒计，最大 65535ms
        let timeout_ms = timeout.as_millis().min(u16::MAX as u128) as u16;
        let ready = poll(&mut fds, PollTimeout::from(timeout_ms)).map_err(io::Error::from)?;
        Ok(ready > 0)
    }

    fn text_write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let path = self.text_api_path()?;
        let mut attr = OpenOptions::new().write(true).open(path)?;
        Ok(attr.write(data)?)
    }

    fn text_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let path = self.text_api_path()?;
        let mut attr = File::open(path)?;
        match attr.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_empty_read(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motor_protocol::{STATUS_SIZE, Status};
    use nix::sys::stat::Mode;
    use nix::unistd::mkfifo;

    fn fifo_motor(dir: &Path) -> (CharDeviceMotor, PathBuf) {
        let path = dir.join("mtr0");
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
        let identity = DeviceIdentity {
            name: "fifo".to_string(),
            dev_path: path.to_string_lossy().into_owned(),
            ..Default::default()
        };
        (CharDeviceMotor::new(identity, Some(dir.to_path_buf())), path)
    }

    #[test]
    fn test_not_open_is_error() {
        let mut motor = CharDeviceMotor::new(DeviceIdentity::default(), None);
        let mut buf = [0u8; STATUS_SIZE];
        assert!(matches!(motor.read(&mut buf), Err(TransportError::NotOpen(_))));
        assert!(matches!(motor.try_read(&mut buf), Err(TransportError::NotOpen(_))));
        assert!(matches!(
            motor.text_get("kp"),
            Err(TransportError::TextUnavailable(_))
        ));
    }

    #[test]
    fn test_try_read_empty_fifo_restores_flags() {
        let dir = tempfile::tempdir().unwrap();
        let (mut motor, _) = fifo_motor(dir.path());
        motor.open().unwrap();

        let fd = motor.file.as_ref().unwrap().as_raw_fd();
        let before = get_flags(fd).unwrap();
        assert_eq!(before & libc::O_NONBLOCK, 0);

        let mut buf = [0u8; STATUS_SIZE];
        assert_eq!(motor.try_read(&mut buf).unwrap(), 0);
        assert_eq!(motor.prefetch().unwrap(), None);

        let after = get_flags(fd).unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn test_restore_failure_keeps_data() {
        let restore_failed = || Err(io::Error::from_raw_os_error(libc::EBADF));
        assert_eq!(
            finish_try_read("/dev/mtr0", Ok(STATUS_SIZE), restore_failed()).unwrap(),
            STATUS_SIZE
        );
        let would_block = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(
            finish_try_read("/dev/mtr0", Err(would_block), restore_failed()).unwrap(),
            0
        );
        let broken = io::Error::from(io::ErrorKind::BrokenPipe);
        assert!(matches!(
            finish_try_read("/dev/mtr0", Err(broken), Ok(())),
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn test_poll_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let (mut motor, path) = fifo_motor(dir.path());
        assert!(matches!(
            motor.poll(Duration::ZERO),
            Err(TransportError::NotOpen(_))
        ));
        motor.open().unwrap();

        let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
        assert!(!motor.poll(Duration::from_millis(1)).unwrap());

        writer.write_all(&Status::default().to_bytes()).unwrap();
        assert!(motor.poll(Duration::from_millis(100)).unwrap());
        let mut status = Status::default();
        assert!(motor.read_status(&mut status).unwrap());
    }

    #[test]
    fn test_read_status_from_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let (mut motor, path) = fifo_motor(dir.path());
        motor.open().unwrap();

        let expected = Status {
            mcu_timestamp: 10,
            host_timestamp_received: 3,
            motor_position: 0.5,
            ..Default::default()
        };
        let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(&expected.to_bytes()).unwrap();

        let mut status = Status::default();
        assert!(motor.read_status(&mut status).unwrap());
        assert_eq!(status, expected);
    }

    #[test]
    fn test_short_record_keeps_previous_status() {
        let dir = tempfile::tempdir().unwrap();
        let (mut motor, path) = fifo_motor(dir.path());
        motor.open().unwrap();

        let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(&[1u8; 12]).unwrap();

        let previous = Status {
            mcu_timestamp: 99,
            ..Default::default()
        };
        let mut status = previous;
        let err = motor.read_status(&mut status).unwrap_err();
        assert!(matches!(
            err,
            TransportError::ShortRead {
                expected: STATUS_SIZE,
                actual: 12
            }
        ));
        assert_eq!(status, previous);
    }

    #[test]
    fn test_text_api_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut motor, _) = fifo_motor(dir.path());
        fs_write(&dir.path().join(TEXT_API_ATTR), b"");

        assert_eq!(motor.text_write(b"kp=2.5").unwrap(), 6);
        let mut buf = [0u8; 64];
        let n = motor.text_read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"kp=2.5");
    }

    fn fs_write(path: &Path, data: &[u8]) {
        std::fs::write(path, data).unwrap();
    }
}
