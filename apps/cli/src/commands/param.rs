//! 通过文本接口读写设备参数

use crate::selection::MotorArgs;
use anyhow::{Context, Result};
use clap::Subcommand;

/// 参数命令
#[derive(Subcommand, Debug)]
pub enum ParamCommand {
    /// 读取参数
    Get {
        /// 参数名
        name: String,
    },
    /// 设置参数
    Set {
        /// 参数名
        name: String,
        /// 参数值
        value: String,
    },
}

impl ParamCommand {
    pub fn execute(&self, motors: &MotorArgs) -> Result<()> {
        let (_, mut manager, _) = motors.connect()?;
        for motor in manager.motors_mut() {
            let device = motor.identity().name.clone();
            let reply = match self {
                Self::Get { name } => motor.text_get(name),
                Self::Set { name, value } => motor.text_set(name, value),
            }
            .with_context(|| format!("Text API request to {} failed", device))?;
            println!("{}: {}", device, reply);
        }
        Ok(())
    }
}
