// Serial defaults, protocol timing, runtime loop and topics
use std::time::Duration;

// Serial link
pub const DEFAULT_BAUDRATE: u32 = 2_000_000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

// Pause between write and read used by older firmware (opt-in via --settle-ms)
pub const LEGACY_SETTLE_DELAY: Duration = Duration::from_millis(100);

// Recalibration prints a report; drain until the line stays quiet this long
pub const DRAIN_QUIET: Duration = Duration::from_millis(500);
pub const MAX_DRAIN_LINES: usize = 256;

// Stray broadcast lines tolerated ahead of a text reply
pub const MAX_SKIPPED_BROADCAST_LINES: usize = 32;

// Background status poller
pub const STATUS_POLL_HZ: u64 = 2;

// Bridge loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD: &str = "actuator/cmd"; // commands in
pub const TOPIC_STATE: &str = "actuator/state"; // polled state out
pub const TOPIC_TELEMETRY: &str = "actuator/telemetry"; // broadcast frames out
pub const TOPIC_HEALTH: &str = "actuator/health"; // health status
