// Host-side client for the open-source actuator board
//
// Provides:
// - Q8.8 fixed-point codec for binary payloads
// - Serial transport (and a scripted mock for tests)
// - Text, binary and passthrough command encodings
// - Request/reply protocol client
// - Broadcast telemetry listener
// - Device-state facade with cached readings and a status poller

pub mod command;
mod device;
pub mod encoding;
mod error;
pub mod fixed_point;
mod protocol;
pub mod telemetry;
pub mod transport;

pub use command::{Command, CommandId, CommandMode, FullState, Phase, PidGains, PidLoop, Reply};
pub use device::{Actuator, DeviceState};
pub use error::{ProtocolError, Result};
pub use protocol::{ClientConfig, ConnectionState, ProtocolClient};
pub use telemetry::{
    BroadcastFrame, ListenStats, ListenerState, TelemetryListener, TelemetrySample, TelemetrySink,
    unix_now,
};
pub use transport::{SerialSettings, SerialTransport, Transport, TransportError, list_ports};
