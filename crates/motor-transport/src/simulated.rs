//! 模拟电机
//!
//! 没有后端设备，读写立即成功。读到的状态由最后一条命令合成：
//! 位置类模式直接跳到目标位置，速度类模式按读取间隔积分，`iq` 和力矩回显设定值。

use crate::identity::DeviceIdentity;
use crate::{MotorTransport, TransportError, TransportKind};
use motor_protocol::{COMMAND_SIZE, Command, STATUS_SIZE, Setpoint, Status};
use std::collections::BTreeMap;
use std::time::Instant;

/// 编码器每单位位置对应的计数
const ENCODER_COUNTS_PER_UNIT: f32 = 1000.0;

pub struct SimulatedMotor {
    identity: DeviceIdentity,
    open: bool,
    started: Instant,
    last_read: Instant,
    command: Command,
    status: Status,
    params: BTreeMap<String, String>,
    pending_reply: Option<String>,
}

impl SimulatedMotor {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            identity: DeviceIdentity {
                name: name.into(),
                version: "simulated".to_string(),
                ..Default::default()
            },
            open: false,
            started: now,
            last_read: now,
            command: Command::default(),
            status: Status::default(),
            params: BTreeMap::new(),
            pending_reply: None,
        }
    }

    /// 最后收到的命令
    pub fn last_command(&self) -> &Command {
        &self.command
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen(self.identity.name.clone()));
        }
        Ok(())
    }

    fn step(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_read).as_secs_f32();
        self.last_read = now;

        let status = &mut self.status;
        status.mcu_timestamp = self.started.elapsed().as_micros() as u32;
        status.host_timestamp_received = self.command.host_timestamp;

        match &self.command.setpoint {
            Setpoint::Position(m) | Setpoint::Impedance(m) | Setpoint::PhaseLock(m) => {
                status.motor_position = m.position;
                status.iq = m.current;
                status.torque = m.torque;
            },
            Setpoint::Velocity(m) | Setpoint::Voltage(m) => {
                status.motor_position += m.velocity * dt;
                status.iq = m.current;
                status.torque = m.torque;
            },
            Setpoint::Current(m) | Setpoint::Torque(m) => {
                status.iq = m.current;
                status.torque = m.torque;
            },
            Setpoint::StepperVelocity(s) => {
                status.motor_position += s.velocity * dt;
            },
            _ => {
                status.iq = 0.0;
                status.torque = 0.0;
            },
        }
        status.joint_position = status.motor_position;
        status.motor_encoder = (status.motor_position * ENCODER_COUNTS_PER_UNIT) as i32;
    }
}

impl MotorTransport for SimulatedMotor {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Simulated
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.open = true;
        self.last_read = Instant::now();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;
        self.step();
        let bytes = self.status.to_bytes();
        let n = buf.len().min(STATUS_SIZE);
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;
        self.command = Command::from_bytes(buf)?;
        Ok(COMMAND_SIZE)
    }

    /// 没有排队数据，非阻塞读总是空
    fn try_read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;
        Ok(0)
    }

    fn text_write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let request = String::from_utf8_lossy(data);
        let reply = match request.split_once('=') {
            Some((name, value)) => {
                self.params.insert(name.to_string(), value.to_string());
                value.to_string()
            },
            None => self
                .params
                .get(request.as_ref())
                .cloned()
                .unwrap_or_default(),
        };
        self.pending_reply = Some(reply);
        Ok(data.len())
    }

    fn text_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let Some(reply) = self.pending_reply.take() else {
            return Ok(0);
        };
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply.as_bytes()[..n]);
        Ok(n)
    }
}
