//! 列出已连接设备

use crate::selection::MotorArgs;
use anyhow::Result;
use clap::Args;
use motor_transport::DeviceIdentity;

/// 列表命令参数
#[derive(Args, Debug, Default)]
pub struct ListCommand {
    /// 只输出设备名称
    #[arg(long)]
    pub names_only: bool,

    /// 只输出总线路径
    #[arg(long, conflicts_with = "names_only")]
    pub path_only: bool,
}

impl ListCommand {
    pub fn execute(&self, motors: &MotorArgs) -> Result<()> {
        let (_, _, identities) = motors.connect()?;
        print!("{}", self.render(&identities));
        Ok(())
    }

    fn render(&self, identities: &[DeviceIdentity]) -> String {
        if self.names_only || self.path_only {
            return identities
                .iter()
                .map(|i| {
                    let field = if self.names_only { &i.name } else { &i.base_path };
                    format!("{}\n", field)
                })
                .collect();
        }

        let mut out = format!(
            "{} connected motor{}\n",
            identities.len(),
            if identities.len() == 1 { "" } else { "s" }
        );
        if identities.is_empty() {
            return out;
        }

        out.push_str(&format!(
            "{:>16}{:>10}{:>15}{:>40}{:>15}\n",
            "Dev", "Name", "Serial number", "Version", "Path"
        ));
        out.push_str(&format!("{}\n", "-".repeat(96)));
        for i in identities {
            out.push_str(&format!(
                "{:>16}{:>10}{:>15}{:>40}{:>15}\n",
                i.dev_path, i.name, i.serial_number, i.version, i.base_path
            ));
        }
        out
    }
}
