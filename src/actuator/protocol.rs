// Request/response engine
//
// `call` is the only primitive: encode with the active strategy, write, read
// one reply unit, decode. Every typed operation is a thin wrapper that knows
// its command, argument order and reply shape. Nothing is retried here.

use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::command::{Command, CommandMode, FullState, Phase, PidGains, PidLoop, Reply};
use super::encoding::{self, Encoding, ReplyUnit};
use super::error::{ProtocolError, Result};
use super::telemetry::is_broadcast_line;
use super::transport::{SerialSettings, SerialTransport, Transport};
use crate::config::{DRAIN_QUIET, MAX_DRAIN_LINES, MAX_SKIPPED_BROADCAST_LINES};

/// Tunables of the request/response exchange
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Pause between writing a text command and reading its reply
    pub settle_delay: Duration,
    /// Silence that ends the recalibration output
    pub drain_quiet: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            drain_quiet: DRAIN_QUIET,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

enum TransportSlot {
    Absent,
    Present(Box<dyn Transport>),
    /// Handed to the telemetry listener until it is stopped
    Lent,
}

/// Protocol client for one board on one serial channel
pub struct ProtocolClient {
    slot: TransportSlot,
    encoding: Box<dyn Encoding>,
    config: ClientConfig,
}

impl ProtocolClient {
    /// Create a disconnected client; `mode` must match the board's current mode
    pub fn new(mode: CommandMode, config: ClientConfig) -> Self {
        Self {
            slot: TransportSlot::Absent,
            encoding: encoding::for_mode(mode),
            config,
        }
    }

    /// Open the serial port, replacing any previous transport
    pub fn connect(&mut self, settings: &SerialSettings) -> Result<()> {
        self.disconnect();
        let transport = SerialTransport::open(settings)?;
        self.attach(Box::new(transport));
        Ok(())
    }

    /// Use an already open transport
    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        self.disconnect();
        self.slot = TransportSlot::Present(transport);
    }

    pub fn disconnect(&mut self) {
        if let TransportSlot::Present(transport) = &mut self.slot {
            transport.close();
            info!("Disconnected");
        }
        self.slot = TransportSlot::Absent;
    }

    pub fn state(&self) -> ConnectionState {
        match &self.slot {
            TransportSlot::Present(t) if t.is_open() => ConnectionState::Connected,
            TransportSlot::Lent => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn mode(&self) -> CommandMode {
        self.encoding.mode()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Move the transport out for exclusive use by the telemetry listener
    pub(crate) fn lend_transport(&mut self) -> Result<Box<dyn Transport>> {
        match std::mem::replace(&mut self.slot, TransportSlot::Lent) {
            TransportSlot::Present(t) => Ok(t),
            TransportSlot::Absent => {
                self.slot = TransportSlot::Absent;
                Err(ProtocolError::NotConnected)
            }
            TransportSlot::Lent => Err(ProtocolError::TransportBusy),
        }
    }

    pub(crate) fn return_transport(&mut self, transport: Box<dyn Transport>) {
        self.slot = TransportSlot::Present(transport);
    }

    /// Run one request/response exchange
    pub fn call(&mut self, command: &Command) -> Result<Reply> {
        let transport = match &mut self.slot {
            TransportSlot::Present(t) if t.is_open() => t,
            TransportSlot::Lent => return Err(ProtocolError::TransportBusy),
            _ => return Err(ProtocolError::NotConnected),
        };

        let request = self.encoding.encode_request(command)?;
        debug!("-> {} ({} bytes)", command.name(), request.len());
        transport.write_all(&request)?;

        let raw = match self.encoding.reply_unit(command) {
            ReplyUnit::Line => {
                if !self.config.settle_delay.is_zero() {
                    sleep(self.config.settle_delay);
                }
                read_reply_line(&mut **transport)?
            }
            ReplyUnit::Bytes(n) => transport.read_exact(n)?,
        };
        debug!("<- {:?}", String::from_utf8_lossy(&raw));

        let reply = self.encoding.decode_reply(command, &raw).inspect_err(|e| {
            warn!("{}", e);
        })?;

        if matches!(command, Command::RecalibrateSensors) {
            drain_until_quiet(&mut **transport, self.config.drain_quiet)?;
        }

        Ok(reply)
    }

    // === Motion ===

    /// Returns the position the board applied (echoed in text mode, requested otherwise)
    pub fn set_position(&mut self, position: f32) -> Result<f32> {
        self.call_set_float(Command::SetPosition(position), position)
    }

    pub fn set_velocity(&mut self, velocity: f32) -> Result<f32> {
        self.call_set_float(Command::SetVelocity(velocity), velocity)
    }

    pub fn set_torque(&mut self, torque: f32) -> Result<f32> {
        self.call_set_float(Command::SetTorque(torque), torque)
    }

    pub fn get_position(&mut self) -> Result<f32> {
        self.call_float(Command::GetPosition)
    }

    pub fn get_velocity(&mut self) -> Result<f32> {
        self.call_float(Command::GetVelocity)
    }

    pub fn get_torque(&mut self) -> Result<f32> {
        self.call_float(Command::GetTorque)
    }

    pub fn enable(&mut self) -> Result<()> {
        self.call_ack(Command::Enable)
    }

    pub fn disable(&mut self) -> Result<()> {
        self.call_ack(Command::Disable)
    }

    pub fn home(&mut self) -> Result<()> {
        self.call_ack(Command::Home)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.call_ack(Command::Stop)
    }

    /// Make the current position the new zero
    pub fn reset_position(&mut self) -> Result<()> {
        self.call_ack(Command::ResetPosition)
    }

    // === Tuning and configuration ===

    pub fn set_pid(&mut self, pid_loop: PidLoop, gains: PidGains) -> Result<PidGains> {
        match self.call(&Command::SetPid(pid_loop, gains))? {
            Reply::Pid(applied) => Ok(applied),
            Reply::Ack => Ok(gains),
            other => Err(unexpected(&Command::SetPid(pid_loop, gains), other)),
        }
    }

    pub fn get_pid(&mut self, pid_loop: PidLoop) -> Result<PidGains> {
        let command = Command::GetPid(pid_loop);
        match self.call(&command)? {
            Reply::Pid(gains) => Ok(gains),
            other => Err(unexpected(&command, other)),
        }
    }

    /// Persist the current configuration to the board's EEPROM
    pub fn save_config(&mut self) -> Result<()> {
        self.call_ack(Command::SaveConfig)
    }

    pub fn set_downsample(&mut self, downsample: i32) -> Result<i32> {
        self.call_set_int(Command::SetDownsample(downsample), downsample)
    }

    pub fn get_downsample(&mut self) -> Result<i32> {
        self.call_int(Command::GetDownsample)
    }

    pub fn set_pole_pairs(&mut self, pole_pairs: i32) -> Result<i32> {
        self.call_set_int(Command::SetPolePairs(pole_pairs), pole_pairs)
    }

    pub fn get_pole_pairs(&mut self) -> Result<i32> {
        self.call_int(Command::GetPolePairs)
    }

    pub fn set_min_angle(&mut self, angle: f32) -> Result<f32> {
        self.call_set_float(Command::SetMinAngle(angle), angle)
    }

    pub fn get_min_angle(&mut self) -> Result<f32> {
        self.call_float(Command::GetMinAngle)
    }

    pub fn set_max_angle(&mut self, angle: f32) -> Result<f32> {
        self.call_set_float(Command::SetMaxAngle(angle), angle)
    }

    pub fn get_max_angle(&mut self) -> Result<f32> {
        self.call_float(Command::GetMaxAngle)
    }

    pub fn set_torque_controller(&mut self, kind: i32) -> Result<i32> {
        self.call_set_int(Command::SetTorqueController(kind), kind)
    }

    pub fn get_torque_controller(&mut self) -> Result<i32> {
        self.call_int(Command::GetTorqueController)
    }

    pub fn set_foc_modulation(&mut self, kind: i32) -> Result<i32> {
        self.call_set_int(Command::SetFocModulation(kind), kind)
    }

    pub fn get_foc_modulation(&mut self) -> Result<i32> {
        self.call_int(Command::GetFocModulation)
    }

    /// Run sensor calibration; follow-up progress lines are drained
    pub fn recalibrate_sensors(&mut self) -> Result<()> {
        self.call_ack(Command::RecalibrateSensors)
    }

    // === Status ===

    pub fn get_temperature(&mut self) -> Result<f32> {
        self.call_float(Command::GetTemperature)
    }

    pub fn get_bus_voltage(&mut self) -> Result<f32> {
        self.call_float(Command::GetBusVoltage)
    }

    pub fn get_internal_temperature(&mut self) -> Result<f32> {
        self.call_float(Command::GetInternalTemperature)
    }

    pub fn get_current(&mut self, phase: Phase) -> Result<f32> {
        self.call_float(Command::GetCurrent(phase))
    }

    pub fn get_full_state(&mut self) -> Result<FullState> {
        match self.call(&Command::GetFullState)? {
            Reply::FullState(state) => Ok(state),
            other => Err(unexpected(&Command::GetFullState, other)),
        }
    }

    // === Session ===

    /// Switch the wire encoding
    ///
    /// The request goes out in the current encoding; the local mode changes
    /// only after the board acknowledged it.
    pub fn set_command_mode(&mut self, mode: CommandMode) -> Result<()> {
        self.call_ack(Command::SetCommandMode(mode))?;
        info!("Command mode switched from {} to {}", self.mode(), mode);
        self.encoding = encoding::for_mode(mode);
        Ok(())
    }

    /// Start (hz > 0) or stop (hz == 0) unsolicited broadcast frames
    pub fn set_broadcast_frequency(&mut self, hz: f32) -> Result<f32> {
        self.call_set_float(Command::SetBroadcast(hz), hz)
    }

    /// Forward a raw text line and return the reply verbatim
    pub fn send_raw(&mut self, line: &str) -> Result<String> {
        let command = Command::Raw(line.trim_end().to_string());
        match self.call(&command)? {
            Reply::Text(text) => Ok(text),
            other => Err(unexpected(&command, other)),
        }
    }

    fn call_ack(&mut self, command: Command) -> Result<()> {
        match self.call(&command)? {
            Reply::Ack => Ok(()),
            other => Err(unexpected(&command, other)),
        }
    }

    fn call_float(&mut self, command: Command) -> Result<f32> {
        match self.call(&command)? {
            Reply::Float(v) => Ok(v),
            other => Err(unexpected(&command, other)),
        }
    }

    fn call_int(&mut self, command: Command) -> Result<i32> {
        match self.call(&command)? {
            Reply::Int(v) => Ok(v),
            other => Err(unexpected(&command, other)),
        }
    }

    /// Confirmed value when the reply carries one, else the requested value
    fn call_set_float(&mut self, command: Command, requested: f32) -> Result<f32> {
        match self.call(&command)? {
            Reply::Float(applied) => Ok(applied),
            Reply::Ack => Ok(requested),
            other => Err(unexpected(&command, other)),
        }
    }

    fn call_set_int(&mut self, command: Command, requested: i32) -> Result<i32> {
        match self.call(&command)? {
            Reply::Int(applied) => Ok(applied),
            Reply::Ack => Ok(requested),
            other => Err(unexpected(&command, other)),
        }
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn unexpected(command: &Command, reply: Reply) -> ProtocolError {
    ProtocolError::decode(command.name(), format!("unexpected reply shape {:?}", reply))
}

/// Next line that is not a stray broadcast frame
fn read_reply_line(transport: &mut dyn Transport) -> Result<Vec<u8>> {
    for _ in 0..MAX_SKIPPED_BROADCAST_LINES {
        let line = transport.read_line()?;
        if is_broadcast_line(&line) {
            debug!("Skipping broadcast line while waiting for a reply");
            continue;
        }
        return Ok(line);
    }
    Ok(Vec::new())
}

/// Consume lines until the board stays silent for `quiet`
///
/// The previous read timeout is restored even when a read fails.
fn drain_until_quiet(transport: &mut dyn Transport, quiet: Duration) -> Result<()> {
    let previous = transport.timeout();
    transport.set_timeout(quiet)?;
    let drained = drain_lines(transport);
    transport.set_timeout(previous)?;

    let drained = drained?;
    if drained == MAX_DRAIN_LINES {
        warn!("Board still talking after {} lines, giving up drain", drained);
    }
    Ok(())
}

fn drain_lines(transport: &mut dyn Transport) -> Result<usize> {
    let mut drained = 0;
    while drained < MAX_DRAIN_LINES {
        let line = transport.read_line()?;
        if line.is_empty() {
            break;
        }
        debug!("Drained: {:?}", String::from_utf8_lossy(&line).trim());
        drained += 1;
    }
    Ok(drained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::transport::mock::MockTransport;

    fn connected(mode: CommandMode) -> (ProtocolClient, MockTransport) {
        let mock = MockTransport::new();
        let mut client = ProtocolClient::new(mode, ClientConfig::default());
        client.attach(Box::new(mock.clone()));
        (client, mock)
    }

    #[test]
    fn test_call_without_transport_is_not_connected() {
        let mut client = ProtocolClient::new(CommandMode::HumanReadable, ClientConfig::default());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.call(&Command::GetPosition),
            Err(ProtocolError::NotConnected)
        ));
    }

    #[test]
    fn test_call_after_disconnect_does_no_io() {
        let (mut client, mock) = connected(CommandMode::HumanReadable);
        client.disconnect();
        assert!(matches!(
            client.get_velocity(),
            Err(ProtocolError::NotConnected)
        ));
        assert!(mock.written().is_empty());
        assert!(!mock.is_open());
    }

    #[test]
    fn test_set_velocity_echo() {
        let (mut client, mock) = connected(CommandMode::HumanReadable);
        mock.push_line("set_velocity 42.0");
        assert_eq!(client.set_velocity(42.0).unwrap(), 42.0);
        assert_eq!(mock.written_text(), vec!["set_velocity 42.0\n"]);

        mock.push_line("set_velocity");
        assert!(matches!(
            client.set_velocity(42.0),
            Err(ProtocolError::Decode { .. })
        ));
    }

    #[test]
    fn test_silent_board_is_decode_error() {
        let (mut client, _mock) = connected(CommandMode::HumanReadable);
        assert!(matches!(client.home(), Err(ProtocolError::Decode { .. })));
    }

    #[test]
    fn test_write_failure_is_transport_error() {
        let (mut client, mock) = connected(CommandMode::HumanReadable);
        mock.set_fail_writes(true);
        assert!(matches!(client.enable(), Err(ProtocolError::Transport(_))));
    }

    #[test]
    fn test_binary_pid_fails_without_io() {
        let (mut client, mock) = connected(CommandMode::HighSpeedBinary);
        assert!(matches!(
            client.get_pid(PidLoop::Velocity),
            Err(ProtocolError::NotSupportedInMode { .. })
        ));
        assert!(mock.written().is_empty());
    }

    #[test]
    fn test_binary_exchange() {
        let (mut client, mock) = connected(CommandMode::HighSpeedBinary);
        mock.push_rx(&[0x0A, 0x80]);
        assert_eq!(client.get_position().unwrap(), 10.5);
        mock.push_rx(&[0x01]);
        assert_eq!(client.set_torque(-0.5).unwrap(), -0.5);
        assert_eq!(mock.written(), vec![vec![0x04], vec![0x03, 0xFF, 0x80]]);

        // short reply
        mock.push_rx(&[0x0A]);
        assert!(matches!(
            client.get_velocity(),
            Err(ProtocolError::Decode { .. })
        ));
    }

    #[test]
    fn test_mode_switch_only_after_ack() {
        let (mut client, mock) = connected(CommandMode::HumanReadable);

        // no reply: mode stays as it was
        assert!(client.set_command_mode(CommandMode::HighSpeedBinary).is_err());
        assert_eq!(client.mode(), CommandMode::HumanReadable);

        mock.push_line("cmd_mode 2");
        client.set_command_mode(CommandMode::HighSpeedBinary).unwrap();
        assert_eq!(client.mode(), CommandMode::HighSpeedBinary);

        // switching back goes out in binary
        mock.push_rx(&[0x01]);
        client.set_command_mode(CommandMode::HumanReadable).unwrap();
        assert_eq!(client.mode(), CommandMode::HumanReadable);
        assert_eq!(mock.written().last().unwrap(), &vec![0xAB, 0x00, 0x01]);
    }

    #[test]
    fn test_full_state_roundtrip() {
        let (mut client, mock) = connected(CommandMode::HumanReadable);
        mock.push_line("full_state 10.0 5.0 1.2 25.0 12.1 30.0 0.1 0.2 0.3");
        let state = client.get_full_state().unwrap();
        assert_eq!(state.bus_voltage, 12.1);
        assert_eq!(state.current_b, 0.2);

        mock.push_line("full_state 10.0 5.0 1.2 25.0 12.1 30.0 0.1 0.2");
        assert!(client.get_full_state().is_err());
    }

    #[test]
    fn test_recalibrate_drains_progress_lines() {
        let (mut client, mock) = connected(CommandMode::HumanReadable);
        mock.push_line("recalibrate_sensors");
        mock.push_line("calibrating encoder...");
        mock.push_line("done");
        client.recalibrate_sensors().unwrap();

        // next command sees its own reply, not calibration output
        mock.push_line("get_pole_pairs 7");
        assert_eq!(client.get_pole_pairs().unwrap(), 7);
    }

    #[test]
    fn test_failed_drain_restores_timeout() {
        let (mut client, mock) = connected(CommandMode::HumanReadable);
        let before = mock.timeout();
        mock.push_line("recalibrate_sensors");
        mock.push_line("calibrating encoder...");
        mock.fail_reads_after(2);

        assert!(matches!(
            client.recalibrate_sensors(),
            Err(ProtocolError::Transport(_))
        ));
        assert_eq!(mock.timeout(), before);
    }

    #[test]
    fn test_reply_skips_stray_broadcast_lines() {
        let (mut client, mock) = connected(CommandMode::HumanReadable);
        mock.push_line("broadcast_data 1.0 2.0 3.0");
        mock.push_line("broadcast 0.0");
        assert_eq!(client.set_broadcast_frequency(0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_lent_transport_is_busy() {
        let (mut client, _mock) = connected(CommandMode::HumanReadable);
        let transport = client.lend_transport().unwrap();
        assert!(matches!(client.stop(), Err(ProtocolError::TransportBusy)));
        assert!(matches!(
            client.lend_transport(),
            Err(ProtocolError::TransportBusy)
        ));
        client.return_transport(transport);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_send_raw() {
        let (mut client, mock) = connected(CommandMode::SimpleFocPassthrough);
        mock.push_line("MV 3.14");
        assert_eq!(client.send_raw("MV\n").unwrap(), "MV 3.14");
        assert_eq!(mock.written_text(), vec!["MV\n"]);
        assert!(matches!(
            client.get_position(),
            Err(ProtocolError::NotSupportedInMode { .. })
        ));
    }
}
