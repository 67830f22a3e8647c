// Message types exchanged over zenoh by the bridge

use serde::{Deserialize, Serialize};

use crate::actuator::DeviceState;

// Telemetry samples go out on the bus unchanged
pub use crate::actuator::TelemetrySample;

// Command from jog tools/scripts -> bridge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ActuatorCommand {
    SetPosition { value: f32 },
    SetVelocity { value: f32 },
    SetTorque { value: f32 },
    Enable,
    Disable,
    Home,
    Stop,
    ResetPosition,
}

// Polled state published by the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateReport {
    pub state: DeviceState,
    pub timestamp: f64,
}

/// Health status published by the bridge
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BridgeHealth {
    Ok,
    CmdStale,
}
