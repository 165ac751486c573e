//! 设备选择参数（所有子命令共用）

use anyhow::{Context, Result};
use clap::Args;
use motor_driver::{DriverConfig, MotorManager};
use motor_transport::DeviceIdentity;
use std::path::PathBuf;
use tracing::info;

/// 设备选择参数
#[derive(Args, Debug, Default, Clone)]
pub struct MotorArgs {
    /// TOML 配置文件（命令行参数覆盖文件中的值）
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 使用用户态 USB 驱动（否则使用内核字符设备）
    #[arg(long, global = true)]
    pub user_space: bool,

    /// 只连接指定名称的设备
    #[arg(short, long, value_delimiter = ',', global = true)]
    pub names: Vec<String>,

    /// 只连接指定序列号的设备
    #[arg(short, long, value_delimiter = ',', global = true)]
    pub serials: Vec<String>,

    /// 只连接指定总线路径的设备（例如 1-1.2）
    #[arg(short, long, value_delimiter = ',', global = true)]
    pub paths: Vec<String>,

    /// 只连接指定设备节点
    #[arg(long, value_delimiter = ',', global = true)]
    pub devpaths: Vec<String>,

    /// 找不到设备时使用模拟设备
    #[arg(long, global = true)]
    pub allow_simulated: bool,

    /// 读写失败时尝试重连
    #[arg(long, global = true)]
    pub reconnect: bool,
}

impl MotorArgs {
    /// 合并配置文件和命令行参数
    pub fn load_config(&self) -> Result<DriverConfig> {
        let mut config = match &self.config {
            Some(path) => DriverConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => DriverConfig::default(),
        };

        let motors = &mut config.motors;
        motors.user_space |= self.user_space;
        motors.allow_simulated |= self.allow_simulated;
        motors.reconnect |= self.reconnect;

        // 命令行给出任何一种选择时替换文件中的选择
        let selections = [&self.names, &self.serials, &self.paths, &self.devpaths];
        if selections.iter().any(|ids| !ids.is_empty()) {
            motors.names = self.names.clone();
            motors.serial_numbers = self.serials.clone();
            motors.paths = self.paths.clone();
            motors.devpaths = self.devpaths.clone();
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// 按配置绑定设备
    pub fn connect(&self) -> Result<(DriverConfig, MotorManager, Vec<DeviceIdentity>)> {
        let config = self.load_config()?;
        let (manager, identities) = config
            .motors
            .build_manager()
            .context("Failed to bind motors")?;
        info!("Connected to {} motor(s)", identities.len());
        Ok((config, manager, identities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motor_driver::LookupKey;
    use std::fs;

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motors.toml");
        fs::write(
            &path,
            "[motors]\nnames = [\"a\"]\n\n[deadline]\nperiod_us = 1000\n",
        )
        .unwrap();

        let args = MotorArgs {
            config: Some(path),
            serials: vec!["SN1".to_string()],
            reconnect: true,
            ..Default::default()
        };
        let config = args.load_config().unwrap();

        let (key, ids) = config.motors.selection().unwrap();
        assert_eq!(key, LookupKey::SerialNumber);
        assert_eq!(ids, ["SN1".to_string()]);
        assert!(config.motors.reconnect);
        assert_eq!(config.deadline.period_us, 1000);
    }

    #[test]
    fn test_file_selection_kept_without_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motors.toml");
        fs::write(&path, "[motors]\npaths = [\"1-2\"]\n").unwrap();

        let args = MotorArgs {
            config: Some(path),
            ..Default::default()
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.motors.selection().unwrap().0, LookupKey::Path);
    }

    #[test]
    fn test_missing_config_file() {
        let args = MotorArgs {
            config: Some(PathBuf::from("/nonexistent/motors.toml")),
            ..Default::default()
        };
        assert!(args.load_config().is_err());
    }
}
