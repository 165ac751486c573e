//! # 驱动配置
//!
//! TOML 配置文件，分为设备选择 `[motors]` 和控制循环 `[deadline]` 两节，
//! 所有字段都有默认值：
//!
//! ```toml
//! [motors]
//! user_space = false
//! names = ["left", "right"]
//! reconnect = true
//!
//! [deadline]
//! period_us = 500
//! scheduling = "auto"
//! ```

use crate::deadline::SchedulingPolicy;
use crate::error::DriverError;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::rate::RateGate;
use crate::registry::{LookupKey, MotorManager};
use crate::sched::{DEFAULT_RUNTIME, DeadlineParams};
use motor_transport::{DeviceIdentity, DriverFlavor, SystemDeviceSource};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub motors: MotorConfig,
    pub deadline: LoopConfig,
}

impl DriverConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, DriverError> {
        let config: Self =
            toml::from_str(content).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        self.motors.validate()?;
        self.deadline.validate()
    }
}

/// 设备选择与注册表策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    /// 使用用户态 USB 传输（否则使用内核字符设备）
    pub user_space: bool,
    pub names: Vec<String>,
    pub serial_numbers: Vec<String>,
    pub paths: Vec<String>,
    pub devpaths: Vec<String>,
    /// 找不到设备时用模拟设备顶替
    pub allow_simulated: bool,
    pub reconnect: bool,
    pub reconnect_interval_ms: u64,
    pub auto_count: bool,
    /// 遥测目标地址（`host:port`）
    pub telemetry: Option<String>,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            user_space: false,
            names: Vec::new(),
            serial_numbers: Vec::new(),
            paths: Vec::new(),
            devpaths: Vec::new(),
            allow_simulated: false,
            reconnect: false,
            reconnect_interval_ms: 1000,
            auto_count: true,
            telemetry: None,
        }
    }
}

impl MotorConfig {
    pub fn flavor(&self) -> DriverFlavor {
        if self.user_space {
            DriverFlavor::UserSpace
        } else {
            DriverFlavor::KernelDriver
        }
    }

    /// 选择依据；都为空时返回 `None`（绑定全部已连接设备）
    pub fn selection(&self) -> Option<(LookupKey, &[String])> {
        [
            (LookupKey::Name, &self.names),
            (LookupKey::SerialNumber, &self.serial_numbers),
            (LookupKey::Path, &self.paths),
            (LookupKey::DevPath, &self.devpaths),
        ]
        .into_iter()
        .find(|(_, ids)| !ids.is_empty())
        .map(|(key, ids)| (key, ids.as_slice()))
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        let lists = [
            &self.names,
            &self.serial_numbers,
            &self.paths,
            &self.devpaths,
        ];
        if lists.iter().filter(|ids| !ids.is_empty()).count() > 1 {
            return Err(DriverError::Config(
                "select motors by only one of names, serial_numbers, paths, devpaths".to_string(),
            ));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(DriverError::Config(
                "reconnect_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// 按配置创建注册表并绑定设备
    pub fn build_manager(&self) -> Result<(MotorManager, Vec<DeviceIdentity>), DriverError> {
        self.validate()?;
        let mut manager = MotorManager::new(Box::new(SystemDeviceSource::new(self.flavor())));
        self.apply(&mut manager);
        let identities = self.bind(&mut manager)?;
        Ok((manager, identities))
    }

    /// 把注册表策略应用到已有注册表
    pub fn apply(&self, manager: &mut MotorManager) {
        manager.set_reconnect(self.reconnect);
        manager.set_auto_count(self.auto_count);
        manager.set_reconnect_gate(RateGate::new(Duration::from_millis(
            self.reconnect_interval_ms,
        )));
    }

    /// 按选择依据绑定设备
    pub fn bind(&self, manager: &mut MotorManager) -> Result<Vec<DeviceIdentity>, DriverError> {
        match self.selection() {
            Some((LookupKey::Name, ids)) => manager.get_motors_by_name(ids, self.allow_simulated),
            Some((LookupKey::SerialNumber, ids)) => {
                manager.get_motors_by_serial_number(ids, self.allow_simulated)
            },
            Some((LookupKey::Path, ids)) => manager.get_motors_by_path(ids, self.allow_simulated),
            Some((LookupKey::DevPath, ids)) => {
                manager.get_motors_by_devpath(ids, self.allow_simulated)
            },
            None => manager.get_connected_motors(),
        }
    }
}

/// 控制循环参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// 周期（微秒）
    pub period_us: u64,
    /// SCHED_DEADLINE 运行时间预算（微秒）
    pub runtime_us: u64,
    /// 相对截止时间占周期的比例
    pub deadline_ratio: f64,
    pub scheduling: SchedulingPolicy,
    /// 滞后超过该值时告警
    pub delay_warn_threshold: i64,
    /// 告警最小间隔（毫秒）
    pub warn_interval_ms: u64,
    pub history_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            period_us: 500,
            runtime_us: DEFAULT_RUNTIME.as_micros() as u64,
            deadline_ratio: 0.6,
            scheduling: SchedulingPolicy::Auto,
            delay_warn_threshold: 1,
            warn_interval_ms: 1000,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl LoopConfig {
    /// 指定周期，其余取默认值
    pub fn with_period(period: Duration) -> Self {
        Self {
            period_us: period.as_micros() as u64,
            ..Default::default()
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_micros(self.period_us)
    }

    pub fn runtime(&self) -> Duration {
        Duration::from_micros(self.runtime_us)
    }

    pub fn warn_interval(&self) -> Duration {
        Duration::from_millis(self.warn_interval_ms)
    }

    pub fn deadline_params(&self) -> DeadlineParams {
        DeadlineParams::from_period(self.period(), self.runtime(), self.deadline_ratio)
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.period_us == 0 {
            return Err(DriverError::Config("period_us must be non-zero".to_string()));
        }
        if self.runtime_us >= self.period_us {
            return Err(DriverError::Config(format!(
                "period_us ({}) must exceed runtime_us ({})",
                self.period_us, self.runtime_us
            )));
        }
        if !(self.deadline_ratio > 0.0 && self.deadline_ratio <= 1.0) {
            return Err(DriverError::Config(format!(
                "deadline_ratio must be in (0, 1], got {}",
                self.deadline_ratio
            )));
        }
        if self.history_capacity == 0 {
            return Err(DriverError::Config(
                "history_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.deadline.period(), Duration::from_micros(500));
        assert_eq!(config.deadline.runtime(), Duration::from_micros(300));
        assert_eq!(
            config.deadline.deadline_params().deadline,
            Duration::from_micros(300)
        );
        assert!(config.motors.auto_count);
        assert!(!config.motors.reconnect);
        assert!(config.motors.selection().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config = DriverConfig::from_toml_str(
            r#"
            [motors]
            user_space = true
            serial_numbers = ["A1", "B2"]
            reconnect = true

            [deadline]
            period_us = 1000
            scheduling = "sleep"
            "#,
        )
        .unwrap();

        assert_eq!(config.motors.flavor(), DriverFlavor::UserSpace);
        let (key, ids) = config.motors.selection().unwrap();
        assert_eq!(key, LookupKey::SerialNumber);
        assert_eq!(ids, ["A1".to_string(), "B2".to_string()]);
        assert_eq!(config.deadline.period(), Duration::from_millis(1));
        assert_eq!(config.deadline.scheduling, SchedulingPolicy::Sleep);
        // 未给出的字段取默认值
        assert_eq!(config.deadline.runtime_us, 300);
    }

    #[test]
    fn test_reject_multiple_selections() {
        let result = DriverConfig::from_toml_str(
            r#"
            [motors]
            names = ["a"]
            paths = ["1-1"]
            "#,
        );
        assert!(matches!(result, Err(DriverError::Config(_))));
    }

    #[test]
    fn test_reject_period_not_above_runtime() {
        let config = LoopConfig {
            period_us: 300,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = LoopConfig {
            period_us: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_malformed_toml() {
        let result = DriverConfig::from_toml_str("[deadline]\nperiod_us = \"fast\"");
        assert!(matches!(result, Err(DriverError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.toml");
        fs::write(&path, "[deadline]\nperiod_us = 2000\n").unwrap();

        let config = DriverConfig::from_file(&path).unwrap();
        assert_eq!(config.deadline.period_us, 2000);

        assert!(DriverConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
