//! # motor-util
//!
//! 电机驱动命令行工具。
//!
//! ```bash
//! # 列出已连接设备
//! motor-util list
//!
//! # 位置模式，只下发给指定设备
//! motor-util --names left,right set --mode position --position 1.5
//!
//! # 1 kHz 轮询并输出时间统计
//! motor-util read --frequency 1000 --statistics
//!
//! # 固定周期控制循环（需要 root 才能使用 SCHED_DEADLINE）
//! motor-util --config motors.toml deadline --period-us 500
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use motor_driver::CancellationToken;
use tracing_subscriber::EnvFilter;

mod commands;
mod selection;

use commands::{DeadlineCommand, ListCommand, ParamCommand, ReadCommand, SetCommand};
use selection::MotorArgs;

/// motor-util - 电机驱动命令行工具
#[derive(Parser, Debug)]
#[command(name = "motor-util")]
#[command(about = "Utility for communicating with motor drivers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    motors: MotorArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出已连接设备（默认）
    List {
        #[command(flatten)]
        args: ListCommand,
    },

    /// 向设备下发一条命令
    Set {
        #[command(flatten)]
        args: SetCommand,
    },

    /// 轮询读取设备状态
    Read {
        #[command(flatten)]
        args: ReadCommand,
    },

    /// 读写设备参数（文本接口）
    #[command(subcommand)]
    Param(ParamCommand),

    /// 运行固定周期控制循环
    Deadline {
        #[command(flatten)]
        args: DeadlineCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("motor_util=info".parse()?))
        .init();

    let cli = Cli::parse();

    // Ctrl+C：协作式停止（读循环和控制循环在当前周期结束后退出）
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt signal. Stopping...");
        handler_token.cancel();
    })
    .context("Failed to set signal handler")?;

    match cli.command {
        None => ListCommand::default().execute(&cli.motors),
        Some(Commands::List { args }) => args.execute(&cli.motors),
        Some(Commands::Set { args }) => args.execute(&cli.motors),
        Some(Commands::Read { args }) => args.execute(&cli.motors, token),
        Some(Commands::Param(cmd)) => cmd.execute(&cli.motors),
        Some(Commands::Deadline { args }) => args.execute(&cli.motors, token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_selection_before_subcommand() {
        let cli = Cli::try_parse_from([
            "motor-util",
            "--names",
            "left,right",
            "--allow-simulated",
            "set",
            "--mode",
            "position",
            "--position",
            "1.5",
        ])
        .unwrap();
        assert_eq!(cli.motors.names, ["left", "right"]);
        assert!(cli.motors.allow_simulated);
        match cli.command {
            Some(Commands::Set { args }) => assert_eq!(args.position, 1.5),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_deadline() {
        let cli = Cli::try_parse_from([
            "motor-util",
            "deadline",
            "--period-us",
            "1000",
            "--scheduling",
            "sleep",
            "--user-space",
        ])
        .unwrap();
        assert!(cli.motors.user_space);
        match cli.command {
            Some(Commands::Deadline { args }) => {
                assert_eq!(args.period_us, Some(1000));
                assert_eq!(args.scheduling, Some(commands::deadline::SchedulingArg::Sleep));
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_default_command_is_list() {
        let cli = Cli::try_parse_from(["motor-util"]).unwrap();
        assert!(cli.command.is_none());
    }
}
