//! 轮询读取设备状态

use crate::selection::MotorArgs;
use anyhow::{Context, Result, bail};
use clap::Args;
use motor_driver::{CancellationToken, DEFAULT_POLL_TIMEOUT, Schedule};
use motor_protocol::Status;
use motor_tools::Statistics;
use std::thread;
use std::time::{Duration, Instant};

/// 统计窗口和报告间隔（样本数）
const STATISTICS_WINDOW: usize = 100;

/// 读取命令参数
#[derive(Args, Debug)]
pub struct ReadCommand {
    /// 阻塞读之前先做一次非阻塞预读
    #[arg(long)]
    pub aread: bool,

    /// 阻塞读之前先等待设备可读（1ms 超时）
    #[arg(long)]
    pub poll: bool,

    /// 读取频率（Hz）
    #[arg(short, long, default_value_t = 1000.0)]
    pub frequency: f64,

    /// 输出周期/执行时间统计而不是状态
    #[arg(long)]
    pub statistics: bool,

    /// 读取次数后退出（默认一直运行到 Ctrl+C）
    #[arg(long)]
    pub count: Option<u64>,
}

impl ReadCommand {
    pub fn execute(&self, motors: &MotorArgs, token: CancellationToken) -> Result<()> {
        if !(self.frequency > 0.0 && self.frequency.is_finite()) {
            bail!("Frequency must be positive, got {}", self.frequency);
        }
        let (_, mut manager, _) = motors.connect()?;

        let start = Instant::now();
        let mut schedule = Schedule::new(start, Duration::from_secs_f64(1.0 / self.frequency));
        let mut exec = Statistics::new(STATISTICS_WINDOW);
        let mut period = Statistics::new(STATISTICS_WINDOW);
        let mut loop_start = start;
        let mut reads = 0u64;

        if self.statistics {
            println!(
                "{:>15}{:>15}{:>15}{:>15}{:>15}{:>15}{:>15}{:>15}{:>15}",
                "t_ns", "period", "stddev", "min", "max", "exec", "stddev", "min", "max"
            );
        }

        while !token.is_cancelled() && self.count.is_none_or(|n| reads < n) {
            let last_loop_start = loop_start;
            loop_start = Instant::now();
            let deadline = schedule.advance();

            if self.aread {
                manager.aread();
            }
            if self.poll {
                manager.poll(DEFAULT_POLL_TIMEOUT).context("Poll failed")?;
            }
            let statuses = manager.read().context("Read failed")?;
            let exec_time = Instant::now();
            reads += 1;

            if self.statistics {
                exec.push((exec_time - loop_start).as_nanos() as f64);
                period.push((loop_start - last_loop_start).as_nanos() as f64);
                if reads % STATISTICS_WINDOW as u64 == 0 {
                    println!(
                        "{:>15}{:>15.0}{:>15.0}{:>15.0}{:>15.0}{:>15.0}{:>15.0}{:>15.0}{:>15.0}",
                        (loop_start - start).as_nanos(),
                        period.get_mean().floor(),
                        period.get_stddev(),
                        period.get_min(),
                        period.get_max(),
                        exec.get_mean().floor(),
                        exec.get_stddev(),
                        exec.get_min(),
                        exec.get_max()
                    );
                }
            } else {
                println!("{}", format_statuses(statuses));
            }

            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
        }
        Ok(())
    }
}

/// 一行输出所有设备的状态
pub fn format_statuses(statuses: &[Status]) -> String {
    statuses
        .iter()
        .map(|s| {
            format!(
                "{}, {}, {:.6}, {:.6}, {:.6}, {:.6}, {}",
                s.mcu_timestamp,
                s.host_timestamp_received,
                s.motor_position,
                s.joint_position,
                s.iq,
                s.torque,
                s.motor_encoder
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}
