//! 周期控制循环
//!
//! 控制线程按固定周期下发保存的命令；主线程从历史记录中增量取样，
//! 每秒输出一次周期、执行时间和滞后的统计。

use crate::selection::MotorArgs;
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use motor_driver::{
    CancellationToken, DeadlineTask, HistoryBuffer, HistoryRecord, LoopReport, SchedulingPolicy,
    TcpTelemetry, serialize_commands,
};
use motor_tools::Statistics;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);
const REPORT_WINDOW: usize = 1000;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingArg {
    Auto,
    Deadline,
    Sleep,
}

impl From<SchedulingArg> for SchedulingPolicy {
    fn from(arg: SchedulingArg) -> Self {
        match arg {
            SchedulingArg::Auto => Self::Auto,
            SchedulingArg::Deadline => Self::Deadline,
            SchedulingArg::Sleep => Self::Sleep,
        }
    }
}

/// 控制循环命令参数
#[derive(Args, Debug)]
pub struct DeadlineCommand {
    /// 周期（微秒，覆盖配置）
    #[arg(long)]
    pub period_us: Option<u64>,

    /// 调度策略（覆盖配置）
    #[arg(long, value_enum)]
    pub scheduling: Option<SchedulingArg>,

    /// 运行时长（秒，默认运行到 Ctrl+C）
    #[arg(long)]
    pub duration: Option<f64>,

    /// 遥测目标地址（host:port，覆盖配置）
    #[arg(long)]
    pub telemetry: Option<String>,

    /// 启动前加载保存的命令
    #[arg(long)]
    pub load_commands: Option<PathBuf>,

    /// 退出后保存命令
    #[arg(long)]
    pub save_commands: Option<PathBuf>,
}

impl DeadlineCommand {
    pub fn execute(&self, motors: &MotorArgs, token: CancellationToken) -> Result<()> {
        let (mut config, mut manager, _) = motors.connect()?;
        if let Some(period_us) = self.period_us {
            config.deadline.period_us = period_us;
        }
        if let Some(scheduling) = self.scheduling {
            config.deadline.scheduling = scheduling.into();
        }
        config.deadline.validate().context("Invalid loop configuration")?;

        if let Some(path) = &self.load_commands {
            let data = fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            manager
                .deserialize_saved_commands(&data)
                .with_context(|| format!("Failed to load commands from {}", path.display()))?;
            info!("Loaded {} command(s) from {}", manager.len(), path.display());
        }

        let mut task = DeadlineTask::new(config.deadline.clone());
        if let Some(addr) = self.telemetry.as_ref().or(config.motors.telemetry.as_ref()) {
            match TcpTelemetry::connect(addr.as_str()) {
                Ok(sink) => task.set_telemetry(Box::new(sink)),
                Err(e) => warn!("Telemetry disabled, connect to {} failed: {}", addr, e),
            }
        }

        // Ctrl+C 通过共享的取消标志停止任务
        let loop_token = task.cancellation_token();
        let history = task.history();
        task.start(manager).context("Failed to start deadline task")?;
        println!("Deadline loop running at {:?}. Press Ctrl+C to stop.", config.deadline.period());

        let started = Instant::now();
        let deadline = self.duration.map(Duration::from_secs_f64);
        let mut reporter = Reporter::new();
        let mut next_seq = 0;
        let mut last_report = Instant::now();

        while !task.is_finished() {
            if token.is_cancelled() || deadline.is_some_and(|d| started.elapsed() >= d) {
                loop_token.cancel();
                break;
            }
            thread::sleep(Duration::from_millis(10));

            let (records, next) = history.since(next_seq);
            let lost = (next - next_seq).saturating_sub(records.len() as u64);
            if lost > 0 {
                warn!("Reporter fell behind, {} record(s) lost", lost);
            }
            next_seq = next;
            reporter.push_all(&records);

            if last_report.elapsed() >= REPORT_INTERVAL {
                last_report = Instant::now();
                println!("{}", reporter.report_line());
            }
        }

        task.stop();
        let (manager, report) = match task.join() {
            Ok(joined) => joined,
            Err(e) => {
                // 注册表随出错的控制线程一起释放，只能保存最后一个完整周期下发的命令
                if let Some(path) = &self.save_commands {
                    match save_last_cycle_commands(path, &history) {
                        Ok(true) => warn!(
                            "Deadline task failed, saved commands of the last cycle to {}",
                            path.display()
                        ),
                        Ok(false) => warn!(
                            "Deadline task failed before its first cycle, {} not written",
                            path.display()
                        ),
                        Err(save_error) => warn!("{:#}", save_error),
                    }
                }
                return Err(anyhow::Error::new(e).context("Deadline task failed"));
            },
        };
        print_report(&report)?;

        if let Some(path) = &self.save_commands {
            fs::write(path, manager.serialize_saved_commands())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Saved {} command(s) to {}", manager.len(), path.display());
        }
        Ok(())
    }
}

/// 从最后一条历史记录保存命令，没有记录时返回 `Ok(false)`
fn save_last_cycle_commands(path: &Path, history: &HistoryBuffer) -> Result<bool> {
    let Some(last) = history.latest() else {
        return Ok(false);
    };
    fs::write(path, serialize_commands(last.commands()))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

/// 周期/执行时间/滞后统计
struct Reporter {
    period: Statistics,
    exec: Statistics,
    delay: Statistics,
}

impl Reporter {
    fn new() -> Self {
        Self {
            period: Statistics::new(REPORT_WINDOW),
            exec: Statistics::new(REPORT_WINDOW),
            delay: Statistics::new(REPORT_WINDOW),
        }
    }

    fn push_all(&mut self, records: &[HistoryRecord]) {
        for r in records {
            self.period
                .push((r.time_start - r.last_time_start).as_nanos() as f64);
            self.exec.push((r.write_time - r.time_start).as_nanos() as f64);
            self.delay.push(r.delay as f64);
        }
    }

    fn report_line(&self) -> String {
        let p = self.period.summary();
        let e = self.exec.summary();
        format!(
            "period {:.0}±{:.0} ns [{:.0}, {:.0}]  exec {:.0}±{:.0} ns [{:.0}, {:.0}]  delay max {:.0}",
            p.mean,
            p.stddev,
            p.min,
            p.max,
            e.mean,
            e.stddev,
            e.min,
            e.max,
            self.delay.get_max()
        )
    }
}

#[derive(Serialize)]
struct RunSummary<'a> {
    report: &'a LoopReport,
}

fn print_report(report: &LoopReport) -> Result<()> {
    let text = toml::to_string(&RunSummary { report }).context("Failed to format report")?;
    println!("{}", text);
    Ok(())
}
