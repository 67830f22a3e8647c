// Zenoh bridge around one actuator
//
// Poll mode: 50 Hz loop that applies incoming commands, publishes the status
// poller's snapshots and runs a watchdog that stops the motor when jog
// commands stop arriving.
// Stream mode: board broadcasts are forwarded as telemetry samples.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{info, warn};

use crate::actuator::{Actuator, DeviceState, unix_now};
use crate::config::{
    CMD_TIMEOUT, LOOP_HZ, STATUS_POLL_HZ, TOPIC_CMD, TOPIC_HEALTH, TOPIC_STATE, TOPIC_TELEMETRY,
};
use crate::messages::{ActuatorCommand, BridgeHealth, StateReport, TelemetrySample};

pub type BridgeResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// What the bridge reads from the board
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BridgeMode {
    Poll,
    Stream { hz: f32 },
}

/// Command bookkeeping and watchdog
pub struct Bridge {
    cmd_received_at: Instant,
    motion_active: bool,
    health: BridgeHealth,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    pub fn new() -> Self {
        Self {
            cmd_received_at: Instant::now(),
            motion_active: false,
            health: BridgeHealth::CmdStale, // stale until first cmd
        }
    }

    pub fn health(&self) -> BridgeHealth {
        self.health
    }

    /// Record an incoming command
    fn on_command(&mut self, cmd: &ActuatorCommand) {
        self.cmd_received_at = Instant::now();
        self.health = BridgeHealth::Ok;
        self.motion_active = match cmd {
            // jog setpoints must be refreshed continuously
            ActuatorCommand::SetVelocity { .. } | ActuatorCommand::SetTorque { .. } => true,
            ActuatorCommand::SetPosition { .. } => false,
            ActuatorCommand::Stop | ActuatorCommand::Disable => false,
            _ => self.motion_active,
        };
    }

    /// True exactly once when a jog goes stale and the motor must be stopped
    fn watchdog(&mut self) -> bool {
        let cmd_age = self.cmd_received_at.elapsed();
        if cmd_age <= CMD_TIMEOUT {
            return false;
        }
        self.health = BridgeHealth::CmdStale;
        if self.motion_active {
            warn!("Command stale ({:?} old), stopping actuator", cmd_age);
            self.motion_active = false;
            return true;
        }
        false
    }
}

/// Forward one command to the board
pub fn apply_command(actuator: &Actuator, cmd: &ActuatorCommand) -> crate::actuator::Result<()> {
    match *cmd {
        ActuatorCommand::SetPosition { value } => actuator.set_position(value).map(|_| ()),
        ActuatorCommand::SetVelocity { value } => actuator.set_velocity(value).map(|_| ()),
        ActuatorCommand::SetTorque { value } => actuator.set_torque(value).map(|_| ()),
        ActuatorCommand::Enable => actuator.enable(),
        ActuatorCommand::Disable => actuator.disable(),
        ActuatorCommand::Home => actuator.home(),
        ActuatorCommand::Stop => actuator.stop(),
        ActuatorCommand::ResetPosition => actuator.reset_position(),
    }
}

pub async fn run(mut actuator: Actuator, mode: BridgeMode) -> BridgeResult {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_state = session.declare_publisher(TOPIC_STATE).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let (state_tx, mut state_rx) = mpsc::unbounded_channel::<DeviceState>();
    let (sample_tx, mut sample_rx) = mpsc::unbounded_channel::<TelemetrySample>();

    match mode {
        BridgeMode::Poll => {
            let period = Duration::from_millis(1000 / STATUS_POLL_HZ);
            actuator.start_status_poller(period, move |state| {
                let _ = state_tx.send(state.clone());
            })?;
            info!("Publishing state to {} at {} Hz", TOPIC_STATE, STATUS_POLL_HZ);
        }
        BridgeMode::Stream { hz } => {
            actuator.start_telemetry(hz, move |sample| {
                let _ = sample_tx.send(sample);
            })?;
            info!("Publishing telemetry to {} at {} Hz", TOPIC_TELEMETRY, hz);
        }
    }

    let mut bridge = Bridge::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Bridge started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down bridge");
                break;
            }
            _ = tick.tick() => {}
        }

        // 1. Drain all pending commands (non-blocking), apply in order
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            let cmd = match serde_json::from_slice::<ActuatorCommand>(&payload) {
                Ok(cmd) => cmd,
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                    continue;
                }
            };
            if let BridgeMode::Stream { .. } = mode {
                warn!("Ignoring {:?} while streaming telemetry", cmd);
                continue;
            }
            info!("Received command: {:?}", cmd);
            bridge.on_command(&cmd);
            if let Err(e) = tokio::task::block_in_place(|| apply_command(&actuator, &cmd)) {
                warn!("Command {:?} failed: {}", cmd, e);
            }
        }

        // 2. Watchdog
        if bridge.watchdog() {
            if let Err(e) = tokio::task::block_in_place(|| actuator.stop()) {
                warn!("Watchdog stop failed: {}", e);
            }
        }

        // 3. Publish whatever the background consumer produced
        while let Ok(state) = state_rx.try_recv() {
            let report = StateReport {
                state,
                timestamp: unix_now(),
            };
            pub_state.put(serde_json::to_string(&report)?).await?;
        }
        while let Ok(sample) = sample_rx.try_recv() {
            pub_telemetry.put(serde_json::to_string(&sample)?).await?;
        }

        // 4. Publish health
        let health_json = serde_json::to_string(&bridge.health())?;
        pub_health.put(health_json).await?;
    }

    tokio::task::block_in_place(|| actuator.disconnect())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::transport::mock::MockTransport;
    use crate::actuator::{ClientConfig, CommandMode, ProtocolClient};

    #[test]
    fn test_watchdog_stops_stale_jog_once() {
        let mut bridge = Bridge::new();
        assert_eq!(bridge.health(), BridgeHealth::CmdStale);

        bridge.on_command(&ActuatorCommand::SetVelocity { value: 3.0 });
        assert_eq!(bridge.health(), BridgeHealth::Ok);
        assert!(!bridge.watchdog());

        bridge.cmd_received_at = Instant::now() - CMD_TIMEOUT * 2;
        assert!(bridge.watchdog());
        assert_eq!(bridge.health(), BridgeHealth::CmdStale);
        assert!(!bridge.watchdog());
    }

    #[test]
    fn test_watchdog_ignores_one_shot_commands() {
        let mut bridge = Bridge::new();
        bridge.on_command(&ActuatorCommand::SetPosition { value: 90.0 });
        bridge.cmd_received_at = Instant::now() - CMD_TIMEOUT * 2;
        assert!(!bridge.watchdog());

        bridge.on_command(&ActuatorCommand::SetTorque { value: 0.2 });
        bridge.on_command(&ActuatorCommand::Stop);
        bridge.cmd_received_at = Instant::now() - CMD_TIMEOUT * 2;
        assert!(!bridge.watchdog());
    }

    #[test]
    fn test_apply_command_writes_request() {
        let mock = MockTransport::new();
        let mut actuator = Actuator::new(ProtocolClient::new(
            CommandMode::HumanReadable,
            ClientConfig::default(),
        ));
        actuator.attach(Box::new(mock.clone())).unwrap();

        mock.push_line("set_velocity 2.5");
        apply_command(&actuator, &ActuatorCommand::SetVelocity { value: 2.5 }).unwrap();
        assert_eq!(mock.written_text(), vec!["set_velocity 2.5\n".to_string()]);
        assert_eq!(actuator.state().unwrap().velocity, Some(2.5));
    }
}
