// Broadcast telemetry demultiplexer
//
// Once broadcasting is enabled the board pushes lines of the form
//   broadcast_data <pos> <vel> <torque> [<temp> <volt> <int_temp>]
// on the same stream that carries command replies. The listener owns the
// transport for as long as it runs, so command polling cannot interleave.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use super::command::FullState;
use super::error::{ProtocolError, Result};
use super::transport::Transport;

/// Leading token of every broadcast line
pub const BROADCAST_MARKER: &str = "broadcast_data";

/// One unsolicited telemetry record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BroadcastFrame {
    pub position: f32,
    pub velocity: f32,
    pub torque: f32,
    /// Absent in the legacy 3-field form
    pub temperature: Option<f32>,
    pub bus_voltage: Option<f32>,
    pub internal_temperature: Option<f32>,
}

/// Normalized telemetry record handed to facade consumers
///
/// Phase currents are only known from a full-state read; broadcast frames
/// report them as 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TelemetrySample {
    pub position: f32,
    pub velocity: f32,
    pub torque: f32,
    pub current_a: f32,
    pub current_b: f32,
    pub current_c: f32,
    pub timestamp: f64,
}

impl TelemetrySample {
    pub fn from_frame(frame: &BroadcastFrame, timestamp: f64) -> Self {
        Self {
            position: frame.position,
            velocity: frame.velocity,
            torque: frame.torque,
            timestamp,
            ..Default::default()
        }
    }

    pub fn from_full_state(full: &FullState, timestamp: f64) -> Self {
        Self {
            position: full.position,
            velocity: full.velocity,
            torque: full.torque,
            current_a: full.current_a,
            current_b: full.current_b,
            current_c: full.current_c,
            timestamp,
        }
    }
}

/// Result of classifying one received line
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    Frame(BroadcastFrame),
    /// Carries the marker but not 3 or 6 numeric fields
    Malformed,
    /// Anything else (late command replies, firmware chatter)
    Other,
}

impl BroadcastFrame {
    /// Classify a raw line from the stream
    pub fn classify(raw: &[u8]) -> LineKind {
        if !is_broadcast_line(raw) {
            return LineKind::Other;
        }
        let Ok(text) = std::str::from_utf8(raw) else {
            return LineKind::Malformed;
        };

        let values: Option<Vec<f32>> = text
            .split_whitespace()
            .skip(1)
            .map(|v| v.parse::<f32>().ok())
            .collect();

        match values.as_deref() {
            Some(&[position, velocity, torque]) => LineKind::Frame(Self {
                position,
                velocity,
                torque,
                temperature: None,
                bus_voltage: None,
                internal_temperature: None,
            }),
            Some(&[
                position,
                velocity,
                torque,
                temperature,
                bus_voltage,
                internal_temperature,
            ]) => LineKind::Frame(Self {
                position,
                velocity,
                torque,
                temperature: Some(temperature),
                bus_voltage: Some(bus_voltage),
                internal_temperature: Some(internal_temperature),
            }),
            _ => LineKind::Malformed,
        }
    }
}

/// True when the line's first token is the broadcast marker
pub fn is_broadcast_line(raw: &[u8]) -> bool {
    let trimmed = raw.trim_ascii_start();
    trimmed.starts_with(BROADCAST_MARKER.as_bytes())
        && trimmed
            .get(BROADCAST_MARKER.len())
            .is_none_or(|b| b.is_ascii_whitespace())
}

/// Receiver of decoded frames, called on the listener thread
pub trait TelemetrySink: Send + 'static {
    /// `timestamp` is seconds since the Unix epoch at receipt
    fn on_frame(&mut self, frame: BroadcastFrame, timestamp: f64);
}

impl<F> TelemetrySink for F
where
    F: FnMut(BroadcastFrame, f64) + Send + 'static,
{
    fn on_frame(&mut self, frame: BroadcastFrame, timestamp: f64) {
        self(frame, timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Listening,
}

/// Counters reported when the listener stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenStats {
    pub frames: u64,
    pub malformed: u64,
    pub ignored: u64,
}

/// Background read loop with exclusive ownership of the transport
pub struct TelemetryListener {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<(Box<dyn Transport>, ListenStats)>,
}

impl TelemetryListener {
    /// Take the transport and start routing broadcast frames to `sink`
    pub fn start(transport: Box<dyn Transport>, sink: impl TelemetrySink) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || listen(transport, &flag, sink));
        info!("Telemetry listener started");
        Self { stop, handle }
    }

    /// Signal the loop, wait for it and get the transport back
    ///
    /// Returns within one transport read timeout.
    pub fn stop(self) -> Result<(Box<dyn Transport>, ListenStats)> {
        self.stop.store(true, Ordering::Relaxed);
        let (transport, stats) = self
            .handle
            .join()
            .map_err(|_| ProtocolError::PoisonedLock)?;
        info!(
            "Telemetry listener stopped: {} frames, {} malformed, {} ignored",
            stats.frames, stats.malformed, stats.ignored
        );
        Ok((transport, stats))
    }

    /// False once the loop exited on its own (transport failure)
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

fn listen(
    mut transport: Box<dyn Transport>,
    stop: &AtomicBool,
    mut sink: impl TelemetrySink,
) -> (Box<dyn Transport>, ListenStats) {
    let mut stats = ListenStats::default();

    while !stop.load(Ordering::Relaxed) {
        let line = match transport.read_line() {
            Ok(line) => line,
            Err(e) => {
                warn!("Telemetry read failed, listener exiting: {}", e);
                break;
            }
        };
        if line.is_empty() {
            continue;
        }

        match BroadcastFrame::classify(&line) {
            LineKind::Frame(frame) => {
                stats.frames += 1;
                sink.on_frame(frame, unix_now());
            }
            LineKind::Malformed => {
                stats.malformed += 1;
                debug!(
                    "Dropping malformed broadcast line: {:?}",
                    String::from_utf8_lossy(&line)
                );
            }
            LineKind::Other => {
                stats.ignored += 1;
                debug!(
                    "Ignoring non-broadcast line: {:?}",
                    String::from_utf8_lossy(&line)
                );
            }
        }
    }

    (transport, stats)
}

/// Seconds since the Unix epoch
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
