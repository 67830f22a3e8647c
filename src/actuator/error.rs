use super::command::CommandMode;
use super::transport::TransportError;

/// Failures of a single protocol exchange
///
/// None of these are retried by the client; retry policy belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The port could not be opened
    #[error("Connection failed: {0}")]
    Connect(#[source] TransportError),

    #[error("Not connected")]
    NotConnected,

    /// Write/read failure mid-session
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),

    /// Bytes arrived but did not match the expected reply grammar
    #[error("Invalid reply to {command}: {reason}")]
    Decode { command: String, reason: String },

    #[error("{command} is not supported in {mode} mode")]
    NotSupportedInMode { command: String, mode: CommandMode },

    /// The transport is lent to the telemetry listener
    #[error("Transport is in use by the telemetry listener")]
    TransportBusy,

    /// A background consumer already owns the stream
    #[error("Cannot start {requested}: {active} is running")]
    ConsumerActive {
        requested: &'static str,
        active: &'static str,
    },

    #[error("Poisoned lock (thread panic)")]
    PoisonedLock,
}

impl ProtocolError {
    pub(crate) fn decode(command: &str, reason: impl Into<String>) -> Self {
        ProtocolError::Decode {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_supported(command: &str, mode: CommandMode) -> Self {
        ProtocolError::NotSupportedInMode {
            command: command.to_string(),
            mode,
        }
    }
}

impl From<TransportError> for ProtocolError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed => ProtocolError::NotConnected,
            e @ TransportError::Connect { .. } => ProtocolError::Connect(e),
            e => ProtocolError::Transport(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_collapse() {
        let io = TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(matches!(
            ProtocolError::from(io),
            ProtocolError::Transport(_)
        ));
        assert!(matches!(
            ProtocolError::from(TransportError::Closed),
            ProtocolError::NotConnected
        ));
    }

    #[test]
    fn test_display() {
        let e = ProtocolError::not_supported("get_velocity_pid", CommandMode::HighSpeedBinary);
        assert_eq!(
            e.to_string(),
            "get_velocity_pid is not supported in high-speed binary mode"
        );
        let e = ProtocolError::decode("set_velocity", "missing echoed value");
        assert_eq!(
            e.to_string(),
            "Invalid reply to set_velocity: missing echoed value"
        );
    }
}
