// Actuator command set
//
// A command is an operation name plus ordered scalar arguments. The text
// encoding sends the name and arguments, the binary encoding sends the
// one-byte CommandId and a fixed payload.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One-byte command tags
///
/// Values up to 0x0E plus 0xAB/0xAC are understood by the firmware's binary
/// parser. The 0x10.. block tags operations that only exist in text mode so
/// every operation still has exactly one id.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    SetPosition = 0x01,
    SetVelocity = 0x02,
    SetTorque = 0x03,
    GetPosition = 0x04,
    GetVelocity = 0x05,
    GetTorque = 0x06,
    Enable = 0x07,
    Disable = 0x08,
    Home = 0x09,
    Stop = 0x0A,
    ResetPosition = 0x0B,
    GetCurrentA = 0x0C,
    GetCurrentB = 0x0D,
    GetCurrentC = 0x0E,

    SetVelocityPid = 0x10,
    GetVelocityPid = 0x11,
    SetAnglePid = 0x12,
    GetAnglePid = 0x13,
    SetCurrentPid = 0x14,
    GetCurrentPid = 0x15,
    SaveConfig = 0x16,
    SetDownsample = 0x17,
    GetDownsample = 0x18,
    GetTemperature = 0x19,
    GetBusVoltage = 0x1A,
    GetInternalTemperature = 0x1B,
    SetPolePairs = 0x1C,
    GetPolePairs = 0x1D,
    SetMinAngle = 0x1E,
    GetMinAngle = 0x1F,
    SetMaxAngle = 0x20,
    GetMaxAngle = 0x21,
    SetTorqueController = 0x22,
    GetTorqueController = 0x23,
    SetFocModulation = 0x24,
    GetFocModulation = 0x25,
    GetFullState = 0x26,
    RecalibrateSensors = 0x27,
    Raw = 0x28,

    CmdMode = 0xAB,
    Broadcast = 0xAC,
}

/// Wire encoding selected on the board
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommandMode {
    #[default]
    HumanReadable = 1,
    HighSpeedBinary = 2,
    SimpleFocPassthrough = 3,
}

impl CommandMode {
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for CommandMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandMode::HumanReadable => "human-readable",
            CommandMode::HighSpeedBinary => "high-speed binary",
            CommandMode::SimpleFocPassthrough => "SimpleFOC passthrough",
        };
        f.write_str(name)
    }
}

/// Control loop a PID triple belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidLoop {
    Velocity,
    Angle,
    Current,
}

/// Motor phase for current readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    A,
    B,
    C,
}

/// Proportional/integral/derivative gains of one loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PidGains {
    pub p: f32,
    pub i: f32,
    pub d: f32,
}

impl PidGains {
    pub fn new(p: f32, i: f32, d: f32) -> Self {
        Self { p, i, d }
    }
}

/// Composite reply of `get_full_state`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FullState {
    pub position: f32,
    pub velocity: f32,
    pub torque: f32,
    pub temperature: f32,
    pub bus_voltage: f32,
    pub internal_temperature: f32,
    pub current_a: f32,
    pub current_b: f32,
    pub current_c: f32,
}

impl FullState {
    /// Number of numeric fields on the wire
    pub const FIELD_COUNT: usize = 9;

    /// Build from exactly [`Self::FIELD_COUNT`] values in wire order
    pub fn from_fields(fields: &[f32]) -> Option<Self> {
        match *fields {
            [
                position,
                velocity,
                torque,
                temperature,
                bus_voltage,
                internal_temperature,
                current_a,
                current_b,
                current_c,
            ] => Some(Self {
                position,
                velocity,
                torque,
                temperature,
                bus_voltage,
                internal_temperature,
                current_a,
                current_b,
                current_c,
            }),
            _ => None,
        }
    }
}

/// Positional argument of a text command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
    Float(f32),
    Int(i32),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Debug keeps the decimal point on integral values ("42.0")
            Arg::Float(v) => write!(f, "{:?}", v),
            Arg::Int(v) => write!(f, "{}", v),
        }
    }
}

/// Decoded reply
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ack,
    Float(f32),
    Int(i32),
    Pid(PidGains),
    FullState(FullState),
    Text(String),
}

/// Every operation the board understands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetPosition(f32),
    SetVelocity(f32),
    SetTorque(f32),
    GetPosition,
    GetVelocity,
    GetTorque,
    Enable,
    Disable,
    Home,
    Stop,
    ResetPosition,
    SetPid(PidLoop, PidGains),
    GetPid(PidLoop),
    SaveConfig,
    SetDownsample(i32),
    GetDownsample,
    GetTemperature,
    GetBusVoltage,
    GetInternalTemperature,
    GetCurrent(Phase),
    SetPolePairs(i32),
    GetPolePairs,
    SetMinAngle(f32),
    GetMinAngle,
    SetMaxAngle(f32),
    GetMaxAngle,
    SetTorqueController(i32),
    GetTorqueController,
    SetFocModulation(i32),
    GetFocModulation,
    GetFullState,
    RecalibrateSensors,
    SetCommandMode(CommandMode),
    SetBroadcast(f32),
    /// Free-form text line, reply returned verbatim
    Raw(String),
}

impl Command {
    /// Text token for the operation
    pub fn name(&self) -> &str {
        match self {
            Command::SetPosition(_) => "set_position",
            Command::SetVelocity(_) => "set_velocity",
            Command::SetTorque(_) => "set_torque",
            Command::GetPosition => "get_position",
            Command::GetVelocity => "get_velocity",
            Command::GetTorque => "get_torque",
            Command::Enable => "enable",
            Command::Disable => "disable",
            Command::Home => "home",
            Command::Stop => "stop",
            Command::ResetPosition => "reset_position",
            Command::SetPid(PidLoop::Velocity, _) => "set_velocity_pid",
            Command::SetPid(PidLoop::Angle, _) => "set_angle_pid",
            Command::SetPid(PidLoop::Current, _) => "set_current_pid",
            Command::GetPid(PidLoop::Velocity) => "get_velocity_pid",
            Command::GetPid(PidLoop::Angle) => "get_angle_pid",
            Command::GetPid(PidLoop::Current) => "get_current_pid",
            Command::SaveConfig => "save_config",
            Command::SetDownsample(_) => "set_downsample",
            Command::GetDownsample => "get_downsample",
            Command::GetTemperature => "get_temperature",
            Command::GetBusVoltage => "get_bus_voltage",
            Command::GetInternalTemperature => "get_internal_temperature",
            Command::GetCurrent(Phase::A) => "get_current_a",
            Command::GetCurrent(Phase::B) => "get_current_b",
            Command::GetCurrent(Phase::C) => "get_current_c",
            Command::SetPolePairs(_) => "set_pole_pairs",
            Command::GetPolePairs => "get_pole_pairs",
            Command::SetMinAngle(_) => "set_min_angle",
            Command::GetMinAngle => "get_min_angle",
            Command::SetMaxAngle(_) => "set_max_angle",
            Command::GetMaxAngle => "get_max_angle",
            Command::SetTorqueController(_) => "set_torque_controller",
            Command::GetTorqueController => "get_torque_controller",
            Command::SetFocModulation(_) => "set_foc_modulation",
            Command::GetFocModulation => "get_foc_modulation",
            Command::GetFullState => "get_full_state",
            Command::RecalibrateSensors => "recalibrate_sensors",
            Command::SetCommandMode(_) => "cmd_mode",
            Command::SetBroadcast(_) => "broadcast",
            Command::Raw(line) => line.as_str(),
        }
    }

    pub fn id(&self) -> CommandId {
        match self {
            Command::SetPosition(_) => CommandId::SetPosition,
            Command::SetVelocity(_) => CommandId::SetVelocity,
            Command::SetTorque(_) => CommandId::SetTorque,
            Command::GetPosition => CommandId::GetPosition,
            Command::GetVelocity => CommandId::GetVelocity,
            Command::GetTorque => CommandId::GetTorque,
            Command::Enable => CommandId::Enable,
            Command::Disable => CommandId::Disable,
            Command::Home => CommandId::Home,
            Command::Stop => CommandId::Stop,
            Command::ResetPosition => CommandId::ResetPosition,
            Command::SetPid(PidLoop::Velocity, _) => CommandId::SetVelocityPid,
            Command::SetPid(PidLoop::Angle, _) => CommandId::SetAnglePid,
            Command::SetPid(PidLoop::Current, _) => CommandId::SetCurrentPid,
            Command::GetPid(PidLoop::Velocity) => CommandId::GetVelocityPid,
            Command::GetPid(PidLoop::Angle) => CommandId::GetAnglePid,
            Command::GetPid(PidLoop::Current) => CommandId::GetCurrentPid,
            Command::SaveConfig => CommandId::SaveConfig,
            Command::SetDownsample(_) => CommandId::SetDownsample,
            Command::GetDownsample => CommandId::GetDownsample,
            Command::GetTemperature => CommandId::GetTemperature,
            Command::GetBusVoltage => CommandId::GetBusVoltage,
            Command::GetInternalTemperature => CommandId::GetInternalTemperature,
            Command::GetCurrent(Phase::A) => CommandId::GetCurrentA,
            Command::GetCurrent(Phase::B) => CommandId::GetCurrentB,
            Command::GetCurrent(Phase::C) => CommandId::GetCurrentC,
            Command::SetPolePairs(_) => CommandId::SetPolePairs,
            Command::GetPolePairs => CommandId::GetPolePairs,
            Command::SetMinAngle(_) => CommandId::SetMinAngle,
            Command::GetMinAngle => CommandId::GetMinAngle,
            Command::SetMaxAngle(_) => CommandId::SetMaxAngle,
            Command::GetMaxAngle => CommandId::GetMaxAngle,
            Command::SetTorqueController(_) => CommandId::SetTorqueController,
            Command::GetTorqueController => CommandId::GetTorqueController,
            Command::SetFocModulation(_) => CommandId::SetFocModulation,
            Command::GetFocModulation => CommandId::GetFocModulation,
            Command::GetFullState => CommandId::GetFullState,
            Command::RecalibrateSensors => CommandId::RecalibrateSensors,
            Command::SetCommandMode(_) => CommandId::CmdMode,
            Command::SetBroadcast(_) => CommandId::Broadcast,
            Command::Raw(_) => CommandId::Raw,
        }
    }

    /// Positional arguments in wire order
    pub fn args(&self) -> Vec<Arg> {
        match self {
            Command::SetPosition(v)
            | Command::SetVelocity(v)
            | Command::SetTorque(v)
            | Command::SetMinAngle(v)
            | Command::SetMaxAngle(v)
            | Command::SetBroadcast(v) => vec![Arg::Float(*v)],
            Command::SetPid(_, gains) => vec![
                Arg::Float(gains.p),
                Arg::Float(gains.i),
                Arg::Float(gains.d),
            ],
            Command::SetDownsample(n)
            | Command::SetPolePairs(n)
            | Command::SetTorqueController(n)
            | Command::SetFocModulation(n) => vec![Arg::Int(*n)],
            Command::SetCommandMode(mode) => vec![Arg::Int(mode.value() as i32)],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        for arg in self.args() {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
