// Serial transport for the actuator board
//
// Half-duplex byte stream with a bounded read timeout. The protocol client
// talks to it through the `Transport` trait so tests can script the board.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{DEFAULT_BAUDRATE, DEFAULT_TIMEOUT};

/// Upper bound on a single text line, protects against a board that never sends '\n'
const MAX_LINE_LEN: usize = 4096;

/// Error types for the serial channel
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Port missing, permission denied, or hardware absent
    #[error("Failed to open {port}: {source}")]
    Connect {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport is closed")]
    Closed,
}

/// Serial connection parameters
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl SerialSettings {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUDRATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte-oriented channel to the board
///
/// Every read is bounded by the configured timeout. After `close()` every
/// operation returns [`TransportError::Closed`].
pub trait Transport: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read up to and including a '\n'
    ///
    /// Returns whatever was accumulated when the timeout expires, which is
    /// empty if the board said nothing.
    fn read_line(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Read up to `n` bytes; a short result means the timeout expired
    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, TransportError>;

    fn timeout(&self) -> Duration;

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// List serial device paths available on this host
pub fn list_ports() -> Result<Vec<String>, TransportError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}

/// `Transport` over a real serial port
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    // Bytes received past the last returned line
    pending: Vec<u8>,
    timeout: Duration,
}

impl SerialTransport {
    /// Open the port described by `settings`
    pub fn open(settings: &SerialSettings) -> Result<Self, TransportError> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(settings.timeout)
            .open()
            .map_err(|source| TransportError::Connect {
                port: settings.port.clone(),
                source,
            })?;

        info!(
            "Opened serial port {} at {} baud",
            settings.port, settings.baud_rate
        );

        Ok(Self {
            port: Some(port),
            pending: Vec::new(),
            timeout: settings.timeout,
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }

    /// Read whatever is available into `pending`; returns false on timeout
    fn fill(&mut self) -> Result<bool, TransportError> {
        let mut chunk = [0u8; 256];
        let port = self.port()?;
        match port.read(&mut chunk) {
            Ok(0) => Ok(false),
            Ok(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(false),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let rest = self.pending.split_off(pos + 1);
                return Ok(std::mem::replace(&mut self.pending, rest));
            }
            if self.pending.len() >= MAX_LINE_LEN || !self.fill()? {
                return Ok(std::mem::take(&mut self.pending));
            }
        }
    }

    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        while self.pending.len() < n {
            if !self.fill()? {
                break;
            }
        }
        let take = n.min(self.pending.len());
        let rest = self.pending.split_off(take);
        Ok(std::mem::replace(&mut self.pending, rest))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.port()?.set_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial port closed");
        }
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
