//! 设备注册表（MotorManager）
//!
//! 持有已绑定的传输对象，每个设备保存一条"最后下发的命令"，
//! 并对所有设备做批量读写。启用重连策略时，单个设备的读失败不会中断整批操作。

use crate::error::DriverError;
use crate::rate::RateGate;
use bytes::{BufMut, Bytes, BytesMut};
use motor_protocol::{
    COMMAND_SIZE, Command, MotorSetpoint, Reserved, Setpoint, StepperTuning, StepperVelocity,
    Status, Tuning, TuningMode,
};
use motor_transport::{DeviceIdentity, DeviceSource, MotorTransport, SimulatedMotor};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// 重连尝试的默认最小间隔
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// [`MotorManager::poll`] 的默认等待时间
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(1);

const COUNT_PREFIX_SIZE: usize = std::mem::size_of::<usize>();

/// 设备查找依据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKey {
    Name,
    SerialNumber,
    /// 稳定总线路径（`base_path`）
    Path,
    /// 设备节点路径
    DevPath,
}

impl LookupKey {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::SerialNumber => "serial number",
            Self::Path => "path",
            Self::DevPath => "devpath",
        }
    }

    fn field(self, identity: &DeviceIdentity) -> &str {
        match self {
            Self::Name => &identity.name,
            Self::SerialNumber => &identity.serial_number,
            Self::Path => &identity.base_path,
            Self::DevPath => &identity.dev_path,
        }
    }
}

/// 设备注册表
pub struct MotorManager {
    source: Box<dyn DeviceSource>,
    motors: Vec<Box<dyn MotorTransport>>,
    commands: Vec<Command>,
    statuses: Vec<Status>,
    count: u32,
    auto_count: bool,
    reconnect: bool,
    /// 新绑定设备的重连门限模板
    reconnect_gate: RateGate,
    /// 每个设备各自的重连门限
    reconnect_gates: Vec<RateGate>,
    write_warn_gate: RateGate,
}

impl MotorManager {
    pub fn new(source: Box<dyn DeviceSource>) -> Self {
        Self {
            source,
            motors: Vec::new(),
            commands: Vec::new(),
            statuses: Vec::new(),
            count: 0,
            auto_count: true,
            reconnect: false,
            reconnect_gate: RateGate::new(DEFAULT_RECONNECT_INTERVAL),
            reconnect_gates: Vec::new(),
            write_warn_gate: RateGate::new(DEFAULT_RECONNECT_INTERVAL),
        }
    }

    /// 启用/禁用重连策略
    pub fn set_reconnect(&mut self, reconnect: bool) {
        self.reconnect = reconnect;
    }

    /// 替换重连门限（可注入测试时钟）
    ///
    /// 每个设备使用门限的独立副本，一个设备持续失败不会占用其它设备的重连机会。
    pub fn set_reconnect_gate(&mut self, gate: RateGate) {
        self.reconnect_gates = vec![gate.clone(); self.motors.len()];
        self.reconnect_gate = gate;
    }

    pub fn set_auto_count(&mut self, auto_count: bool) {
        self.auto_count = auto_count;
    }

    pub fn reconnect(&self) -> bool {
        self.reconnect
    }

    /// 已下发的命令计数
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn len(&self) -> usize {
        self.motors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motors.is_empty()
    }

    pub fn motors(&self) -> &[Box<dyn MotorTransport>] {
        &self.motors
    }

    pub fn motors_mut(&mut self) -> &mut [Box<dyn MotorTransport>] {
        &mut self.motors
    }

    pub fn identities(&self) -> Vec<DeviceIdentity> {
        self.motors.iter().map(|m| m.identity().clone()).collect()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// 最近一次读取到的状态（失败的设备保留上次的值）
    pub fn statuses(&self) -> &[Status] {
        &self.statuses
    }

    // ==================== 绑定 ====================

    /// 替换绑定集合
    ///
    /// 命令和状态按新设备数重置，命令计数保持不变。
    pub fn set_motors(&mut self, motors: Vec<Box<dyn MotorTransport>>) {
        for motor in self.motors.iter_mut() {
            if let Err(e) = motor.close() {
                debug!("Close {} failed: {}", motor.identity().name, e);
            }
        }
        self.commands = vec![Command::default(); motors.len()];
        self.statuses = vec![Status::default(); motors.len()];
        self.reconnect_gates = vec![self.reconnect_gate.clone(); motors.len()];
        self.motors = motors;
    }

    /// 绑定所有当前可见的设备
    ///
    /// 探测或打开失败的设备（例如枚举过程中被拔出）被跳过。
    pub fn get_connected_motors(&mut self) -> Result<Vec<DeviceIdentity>, DriverError> {
        let mut motors = Vec::new();
        for mut motor in self.probe_all()? {
            match motor.open() {
                Ok(()) => motors.push(motor),
                Err(e) => warn!("Skipping {}: {}", motor.identity().dev_path, e),
            }
        }
        self.set_motors(motors);
        info!("Bound {} connected motor(s)", self.motors.len());
        Ok(self.identities())
    }

    pub fn get_motors_by_name(
        &mut self,
        names: &[String],
        allow_simulated: bool,
    ) -> Result<Vec<DeviceIdentity>, DriverError> {
        self.bind_by(LookupKey::Name, names, allow_simulated)
    }

    pub fn get_motors_by_serial_number(
        &mut self,
        serial_numbers: &[String],
        allow_simulated: bool,
    ) -> Result<Vec<DeviceIdentity>, DriverError> {
        self.bind_by(LookupKey::SerialNumber, serial_numbers, allow_simulated)
    }

    pub fn get_motors_by_path(
        &mut self,
        paths: &[String],
        allow_simulated: bool,
    ) -> Result<Vec<DeviceIdentity>, DriverError> {
        self.bind_by(LookupKey::Path, paths, allow_simulated)
    }

    pub fn get_motors_by_devpath(
        &mut self,
        devpaths: &[String],
        allow_simulated: bool,
    ) -> Result<Vec<DeviceIdentity>, DriverError> {
        self.bind_by(LookupKey::DevPath, devpaths, allow_simulated)
    }

    fn bind_by(
        &mut self,
        key: LookupKey,
        ids: &[String],
        allow_simulated: bool,
    ) -> Result<Vec<DeviceIdentity>, DriverError> {
        let motors = self.find_motors(key, ids, allow_simulated)?;
        self.set_motors(motors);
        Ok(self.identities())
    }

    /// 按标识查找并打开设备，不修改绑定集合
    ///
    /// 每个标识必须恰好匹配一个设备；任何一个失败都返回错误，已打开的设备会被关闭。
    pub fn find_motors(
        &self,
        key: LookupKey,
        ids: &[String],
        allow_simulated: bool,
    ) -> Result<Vec<Box<dyn MotorTransport>>, DriverError> {
        let mut candidates: Vec<Option<Box<dyn MotorTransport>>> =
            self.probe_all()?.into_iter().map(Some).collect();

        let mut selected: Vec<Box<dyn MotorTransport>> = Vec::with_capacity(ids.len());
        for id in ids {
            let matches: Vec<usize> = candidates
                .iter()
                .enumerate()
                .filter_map(|(i, c)| {
                    c.as_ref()
                        .filter(|m| key.field(m.identity()) == id)
                        .map(|_| i)
                })
                .collect();

            match matches.as_slice() {
                [index] => {
                    let motor = candidates[*index]
                        .take()
                        .ok_or_else(|| DriverError::DuplicateMotor(id.clone()))?;
                    selected.push(motor);
                },
                [] if already_taken(&selected, key, id) => {
                    return Err(DriverError::DuplicateMotor(id.clone()));
                },
                [] if allow_simulated => {
                    warn!(
                        "Found no motors matching {} \"{}\", using simulated motor",
                        key.describe(),
                        id
                    );
                    selected.push(Box::new(SimulatedMotor::new(id.clone())));
                },
                [] => {
                    return Err(DriverError::NotFound {
                        what: key.describe(),
                        key: id.clone(),
                    });
                },
                many => {
                    return Err(DriverError::Ambiguous {
                        what: key.describe(),
                        key: id.clone(),
                        count: many.len(),
                    });
                },
            }
        }

        for i in 0..selected.len() {
            if let Err(source) = selected[i].open() {
                let device = selected[i].identity().dev_path.clone();
                for motor in selected[..i].iter_mut() {
                    if let Err(e) = motor.close() {
                        debug!("Close {} failed: {}", motor.identity().name, e);
                    }
                }
                return Err(DriverError::OpenFailed { device, source });
            }
        }
        Ok(selected)
    }

    fn probe_all(&self) -> Result<Vec<Box<dyn MotorTransport>>, DriverError> {
        let mut motors = Vec::new();
        for path in self.source.enumerate()? {
            match self.source.probe(&path) {
                Ok(motor) => motors.push(motor),
                Err(e) => debug!("Probe {} failed: {}", path, e),
            }
        }
        Ok(motors)
    }

    // ==================== 批量 I/O ====================

    /// 阻塞读取所有设备
    ///
    /// 空读保留上次状态。未启用重连时任一设备失败即返回 `ReadFailed`；
    /// 启用重连时失败的设备保留上次状态并尝试按总线路径重新发现。
    pub fn read(&mut self) -> Result<&[Status], DriverError> {
        for i in 0..self.motors.len() {
            if let Err(source) = self.motors[i].read_status(&mut self.statuses[i]) {
                if !self.reconnect {
                    return Err(DriverError::ReadFailed {
                        device: self.motors[i].identity().name.clone(),
                        source,
                    });
                }
                self.try_reconnect(i, &source);
            }
        }
        Ok(&self.statuses)
    }

    /// 非阻塞预取（结果丢弃，随后的阻塞读才是权威读取）
    pub fn aread(&mut self) {
        for motor in self.motors.iter_mut() {
            match motor.prefetch() {
                Ok(Some(_)) => trace!("Nonzero aread on {}", motor.identity().name),
                Ok(None) => {},
                Err(e) => debug!("Aread error on {}: {}", motor.identity().name, e),
            }
        }
    }

    /// 等待设备可读，返回就绪的设备数
    ///
    /// 所有设备共用 `timeout`：逐个等待，每个设备只能用剩余的时间。
    /// 启用重连时单个设备的错误被忽略，由随后的 `read` 处理。
    pub fn poll(&self, timeout: Duration) -> Result<usize, DriverError> {
        let deadline = Instant::now() + timeout;
        let mut ready = 0;
        for motor in &self.motors {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match motor.poll(remaining) {
                Ok(true) => ready += 1,
                Ok(false) => {},
                Err(e) if self.reconnect => {
                    debug!("Poll error on {}: {}", motor.identity().name, e);
                },
                Err(source) => {
                    return Err(DriverError::ReadFailed {
                        device: motor.identity().name.clone(),
                        source,
                    });
                },
            }
        }
        Ok(ready)
    }

    fn try_reconnect(&mut self, index: usize, error: &motor_transport::TransportError) {
        if !self.reconnect_gates[index].ready() {
            return;
        }

        let base_path = self.motors[index].identity().base_path.clone();
        warn!(
            "No data read from {}: {}",
            self.motors[index].identity().name,
            error
        );
        warn!("Trying to reconnect {}", base_path);

        // 先释放旧句柄，否则用户态设备无法再次 claim
        if let Err(e) = self.motors[index].close() {
            warn!("Close {} failed: {}", base_path, e);
        }
        match self.find_motors(LookupKey::Path, std::slice::from_ref(&base_path), false) {
            Ok(mut found) => {
                if let Some(motor) = found.pop() {
                    info!("Found motor {}: {}", base_path, motor.identity().name);
                    self.motors[index] = motor;
                }
            },
            Err(e) => warn!("Reconnect {} failed: {}", base_path, e),
        }
    }

    /// 下发一批命令
    ///
    /// 命令计数加一；启用自动计数时将计数写入每条命令（包括保存的命令）。
    pub fn write(&mut self, commands: &[Command]) -> Result<(), DriverError> {
        if commands.len() != self.motors.len() {
            return Err(DriverError::CountMismatch {
                expected: self.motors.len(),
                actual: commands.len(),
            });
        }
        let mut batch = commands.to_vec();
        self.count = self.count.wrapping_add(1);
        if self.auto_count {
            self.set_command_count(self.count);
            for command in batch.iter_mut() {
                command.host_timestamp = self.count;
            }
        }
        self.write_batch(&batch)
    }

    /// 下发保存的命令
    pub fn write_saved_commands(&mut self) -> Result<(), DriverError> {
        self.count = self.count.wrapping_add(1);
        if self.auto_count {
            self.set_command_count(self.count);
        }
        let batch = std::mem::take(&mut self.commands);
        let result = self.write_batch(&batch);
        self.commands = batch;
        result
    }

    fn write_batch(&mut self, batch: &[Command]) -> Result<(), DriverError> {
        for (motor, command) in self.motors.iter_mut().zip(batch) {
            if let Err(source) = motor.write_command(command) {
                if !self.reconnect {
                    return Err(DriverError::WriteFailed {
                        device: motor.identity().name.clone(),
                        source,
                    });
                }
                if self.write_warn_gate.ready() {
                    warn!("Write to {} failed: {}", motor.identity().name, source);
                }
            }
        }
        Ok(())
    }

    // ==================== 命令编辑 ====================

    pub fn set_commands(&mut self, commands: &[Command]) -> Result<(), DriverError> {
        self.check_count(commands.len())?;
        self.commands.copy_from_slice(commands);
        Ok(())
    }

    pub fn set_command_count(&mut self, count: u32) {
        for command in self.commands.iter_mut() {
            command.host_timestamp = count;
        }
    }

    /// 所有设备使用同一设定值
    pub fn set_command_setpoint(&mut self, setpoint: Setpoint) {
        for command in self.commands.iter_mut() {
            command.setpoint = setpoint;
        }
    }

    pub fn set_command_setpoints(&mut self, setpoints: &[Setpoint]) -> Result<(), DriverError> {
        self.check_count(setpoints.len())?;
        for (command, setpoint) in self.commands.iter_mut().zip(setpoints) {
            command.setpoint = *setpoint;
        }
        Ok(())
    }

    pub fn set_command_reserved(&mut self, reserved: &[Reserved]) -> Result<(), DriverError> {
        self.check_count(reserved.len())?;
        for (command, value) in self.commands.iter_mut().zip(reserved) {
            command.reserved = *value;
        }
        Ok(())
    }

    pub fn set_command_current(&mut self, values: &[f32]) -> Result<(), DriverError> {
        self.set_motor_field("current", values, |m, v| m.current = v)
    }

    pub fn set_command_position(&mut self, values: &[f32]) -> Result<(), DriverError> {
        self.set_motor_field("position", values, |m, v| m.position = v)
    }

    pub fn set_command_velocity(&mut self, values: &[f32]) -> Result<(), DriverError> {
        self.set_motor_field("velocity", values, |m, v| m.velocity = v)
    }

    pub fn set_command_torque(&mut self, values: &[f32]) -> Result<(), DriverError> {
        self.set_motor_field("torque", values, |m, v| m.torque = v)
    }

    /// 修改基础设定值的单个字段
    ///
    /// 先检查所有命令的模式都携带该字段，再统一修改。
    fn set_motor_field(
        &mut self,
        field: &'static str,
        values: &[f32],
        apply: impl Fn(&mut MotorSetpoint, f32),
    ) -> Result<(), DriverError> {
        self.check_count(values.len())?;
        if let Some((index, command)) = self
            .commands
            .iter()
            .enumerate()
            .find(|(_, c)| c.setpoint.motor().is_none())
        {
            return Err(DriverError::ModeMismatch {
                index,
                mode: command.mode(),
                field,
            });
        }
        for (command, value) in self.commands.iter_mut().zip(values) {
            if let Some(motor) = command.setpoint.motor_mut() {
                apply(motor, *value);
            }
        }
        Ok(())
    }

    pub fn set_command_current_tuning(
        &mut self,
        mode: TuningMode,
        amplitude: f32,
        frequency: f32,
        bias: f32,
    ) {
        self.set_command_setpoint(Setpoint::CurrentTuning(Tuning {
            mode,
            amplitude,
            frequency,
            bias,
        }));
    }

    pub fn set_command_position_tuning(
        &mut self,
        mode: TuningMode,
        amplitude: f32,
        frequency: f32,
        bias: f32,
    ) {
        self.set_command_setpoint(Setpoint::PositionTuning(Tuning {
            mode,
            amplitude,
            frequency,
            bias,
        }));
    }

    pub fn set_command_stepper_tuning(
        &mut self,
        mode: TuningMode,
        amplitude: f32,
        frequency: f32,
        bias: f32,
        kv: f32,
    ) {
        self.set_command_setpoint(Setpoint::StepperTuning(StepperTuning {
            tuning: Tuning {
                mode,
                amplitude,
                frequency,
                bias,
            },
            kv,
        }));
    }

    pub fn set_command_stepper_velocity(&mut self, voltage: f32, velocity: f32) {
        self.set_command_setpoint(Setpoint::StepperVelocity(StepperVelocity {
            voltage,
            velocity,
        }));
    }

    fn check_count(&self, actual: usize) -> Result<(), DriverError> {
        if actual != self.commands.len() {
            return Err(DriverError::CountMismatch {
                expected: self.commands.len(),
                actual,
            });
        }
        Ok(())
    }

    // ==================== 序列化 ====================

    /// 序列化后的字节数
    pub fn serialize_command_size(&self) -> usize {
        COUNT_PREFIX_SIZE + self.commands.len() * COMMAND_SIZE
    }

    /// 序列化保存的命令，格式见 [`serialize_commands`]
    pub fn serialize_saved_commands(&self) -> Bytes {
        serialize_commands(&self.commands)
    }

    /// 反序列化并替换保存的命令
    ///
    /// 记录数与设备数不一致、数据不足或任何一条记录无法解码时返回错误，保存的命令不变。
    pub fn deserialize_saved_commands(&mut self, data: &[u8]) -> Result<(), DriverError> {
        if data.len() < COUNT_PREFIX_SIZE {
            return Err(DriverError::BufferTooShort {
                expected: COUNT_PREFIX_SIZE,
                actual: data.len(),
            });
        }
        let mut prefix = [0u8; COUNT_PREFIX_SIZE];
        prefix.copy_from_slice(&data[..COUNT_PREFIX_SIZE]);
        let count = usize::from_ne_bytes(prefix);
        self.check_count(count)?;

        let expected = COUNT_PREFIX_SIZE + count * COMMAND_SIZE;
        if data.len() < expected {
            return Err(DriverError::BufferTooShort {
                expected,
                actual: data.len(),
            });
        }

        let decoded = data[COUNT_PREFIX_SIZE..expected]
            .chunks_exact(COMMAND_SIZE)
            .map(Command::from_bytes)
            .collect::<Result<Vec<_>, _>>()?;
        self.commands = decoded;
        Ok(())
    }
}

/// 序列化一组命令：`[usize 记录数（本机字节序）][Command; n]`
pub fn serialize_commands(commands: &[Command]) -> Bytes {
    let mut buf = BytesMut::with_capacity(COUNT_PREFIX_SIZE + commands.len() * COMMAND_SIZE);
    buf.put_slice(&commands.len().to_ne_bytes());
    for command in commands {
        buf.put_slice(&command.to_bytes());
    }
    buf.freeze()
}

fn already_taken(selected: &[Box<dyn MotorTransport>], key: LookupKey, id: &str) -> bool {
    selected.iter().any(|m| key.field(m.identity()) == id)
}

impl Drop for MotorManager {
    fn drop(&mut self) {
        for motor in self.motors.iter_mut() {
            let _ = motor.close();
        }
    }
}
