//! 下发一条命令

use crate::selection::MotorArgs;
use anyhow::{Context, Result, bail};
use clap::Args;
use motor_protocol::{
    Command, ModeDesired, MotorSetpoint, Reserved, Setpoint, StepperTuning, StepperVelocity,
    Tuning, TuningMode,
};

/// 设置命令参数
#[derive(Args, Debug, Default)]
pub struct SetCommand {
    /// 模式（名称或数值，例如 position / 3）
    #[arg(long, default_value = "open", value_parser = parse_mode)]
    pub mode: ModeDesired,

    /// 主机计数（指定时关闭自动计数）
    #[arg(long)]
    pub host_time: Option<u32>,

    #[arg(long, default_value_t = 0.0)]
    pub current: f32,

    #[arg(long, default_value_t = 0.0)]
    pub position: f32,

    #[arg(long, default_value_t = 0.0)]
    pub velocity: f32,

    #[arg(long, default_value_t = 0.0)]
    pub torque: f32,

    /// 调参波形（sine/square/triangle/chirp 或数值）
    #[arg(long, default_value = "sine", value_parser = parse_tuning_mode)]
    pub tuning_mode: TuningMode,

    #[arg(long, default_value_t = 0.0)]
    pub amplitude: f32,

    #[arg(long, default_value_t = 0.0)]
    pub frequency: f32,

    #[arg(long, default_value_t = 0.0)]
    pub bias: f32,

    #[arg(long, default_value_t = 0.0)]
    pub kv: f32,

    /// 步进速度模式的电压
    #[arg(long, default_value_t = 0.0)]
    pub voltage: f32,

    /// 保留字（按 f32 解释）
    #[arg(long)]
    pub reserved: Option<f32>,
}

impl SetCommand {
    pub fn execute(&self, motors: &MotorArgs) -> Result<()> {
        let (_, mut manager, _) = motors.connect()?;
        if manager.is_empty() {
            bail!("No motors connected");
        }

        let command = self.command();
        let commands = vec![command; manager.len()];
        if self.host_time.is_some() {
            manager.set_auto_count(false);
        }

        println!("Writing commands:");
        for (identity, command) in manager.identities().iter().zip(&commands) {
            println!("  {}: {:?}", identity.name, command);
        }
        manager.write(&commands).context("Failed to write commands")?;
        Ok(())
    }

    fn setpoint(&self) -> Setpoint {
        let tuning = Tuning {
            mode: self.tuning_mode,
            amplitude: self.amplitude,
            frequency: self.frequency,
            bias: self.bias,
        };
        match self.mode {
            ModeDesired::CurrentTuning => Setpoint::CurrentTuning(tuning),
            ModeDesired::PositionTuning => Setpoint::PositionTuning(tuning),
            ModeDesired::StepperTuning => Setpoint::StepperTuning(StepperTuning {
                tuning,
                kv: self.kv,
            }),
            ModeDesired::StepperVelocity => Setpoint::StepperVelocity(StepperVelocity {
                voltage: self.voltage,
                velocity: self.velocity,
            }),
            mode => {
                let motor = MotorSetpoint {
                    current: self.current,
                    position: self.position,
                    velocity: self.velocity,
                    torque: self.torque,
                };
                Setpoint::with_motor(mode, motor)
                    .or_else(|| Setpoint::without_payload(mode))
                    .unwrap_or_default()
            },
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(self.setpoint());
        if let Some(host_time) = self.host_time {
            command.host_timestamp = host_time;
        }
        if let Some(reserved) = self.reserved {
            command.reserved = Reserved::from_f32(reserved);
        }
        command
    }
}

const MODE_NAMES: [(&str, ModeDesired); 16] = [
    ("open", ModeDesired::Open),
    ("damped", ModeDesired::Damped),
    ("current", ModeDesired::Current),
    ("position", ModeDesired::Position),
    ("torque", ModeDesired::Torque),
    ("impedance", ModeDesired::Impedance),
    ("velocity", ModeDesired::Velocity),
    ("current_tuning", ModeDesired::CurrentTuning),
    ("position_tuning", ModeDesired::PositionTuning),
    ("voltage", ModeDesired::Voltage),
    ("phase_lock", ModeDesired::PhaseLock),
    ("stepper_tuning", ModeDesired::StepperTuning),
    ("stepper_velocity", ModeDesired::StepperVelocity),
    ("sleep", ModeDesired::Sleep),
    ("crash", ModeDesired::Crash),
    ("reset", ModeDesired::Reset),
];

pub fn parse_mode(s: &str) -> Result<ModeDesired, String> {
    if let Ok(value) = s.parse::<u8>() {
        return ModeDesired::try_from(value).map_err(|_| format!("unknown mode value {}", value));
    }
    let name = s.to_ascii_lowercase().replace('-', "_");
    MODE_NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, mode)| *mode)
        .ok_or_else(|| format!("unknown mode '{}'", s))
}

pub fn parse_tuning_mode(s: &str) -> Result<TuningMode, String> {
    if let Ok(value) = s.parse::<u8>() {
        return TuningMode::try_from(value).map_err(|_| format!("unknown tuning mode {}", value));
    }
    match s.to_ascii_lowercase().as_str() {
        "sine" => Ok(TuningMode::Sine),
        "square" => Ok(TuningMode::Square),
        "triangle" => Ok(TuningMode::Triangle),
        "chirp" => Ok(TuningMode::Chirp),
        _ => Err(format!("unknown tuning mode '{}'", s)),
    }
}
