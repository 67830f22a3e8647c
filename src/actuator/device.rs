// Device-state facade
//
// Wraps the protocol client with a cache of the last value successfully read
// from (or written to) the board, and owns the single background consumer of
// the serial stream: either the status poller or the telemetry listener.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::command::{CommandMode, FullState, Phase, PidGains, PidLoop};
use super::error::{ProtocolError, Result};
use super::protocol::{ConnectionState, ProtocolClient};
use super::telemetry::{
    BroadcastFrame, ListenStats, ListenerState, TelemetryListener, TelemetrySample,
};
use super::transport::{SerialSettings, Transport};

/// Last known value of every readable quantity, `None` until first read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub position: Option<f32>,
    pub velocity: Option<f32>,
    pub torque: Option<f32>,
    pub temperature: Option<f32>,
    pub bus_voltage: Option<f32>,
    pub internal_temperature: Option<f32>,
    pub enabled: Option<bool>,
    pub velocity_pid: Option<PidGains>,
    pub angle_pid: Option<PidGains>,
    pub current_pid: Option<PidGains>,
    pub downsample: Option<i32>,
    pub min_angle: Option<f32>,
    pub max_angle: Option<f32>,
    pub pole_pairs: Option<i32>,
    pub torque_controller: Option<i32>,
    pub foc_modulation: Option<i32>,
}

impl DeviceState {
    fn pid_mut(&mut self, pid_loop: PidLoop) -> &mut Option<PidGains> {
        match pid_loop {
            PidLoop::Velocity => &mut self.velocity_pid,
            PidLoop::Angle => &mut self.angle_pid,
            PidLoop::Current => &mut self.current_pid,
        }
    }

    fn apply_full_state(&mut self, full: &FullState) {
        self.position = Some(full.position);
        self.velocity = Some(full.velocity);
        self.torque = Some(full.torque);
        self.temperature = Some(full.temperature);
        self.bus_voltage = Some(full.bus_voltage);
        self.internal_temperature = Some(full.internal_temperature);
    }
}

/// Client and cache, always locked together
struct Shared {
    client: ProtocolClient,
    state: DeviceState,
}

// Cache updates happen only after a successful round trip
impl Shared {
    fn get_position(&mut self) -> Result<f32> {
        let v = self.client.get_position()?;
        self.state.position = Some(v);
        Ok(v)
    }

    fn get_velocity(&mut self) -> Result<f32> {
        let v = self.client.get_velocity()?;
        self.state.velocity = Some(v);
        Ok(v)
    }

    fn get_torque(&mut self) -> Result<f32> {
        let v = self.client.get_torque()?;
        self.state.torque = Some(v);
        Ok(v)
    }

    fn get_temperature(&mut self) -> Result<f32> {
        let v = self.client.get_temperature()?;
        self.state.temperature = Some(v);
        Ok(v)
    }

    fn get_bus_voltage(&mut self) -> Result<f32> {
        let v = self.client.get_bus_voltage()?;
        self.state.bus_voltage = Some(v);
        Ok(v)
    }

    fn get_internal_temperature(&mut self) -> Result<f32> {
        let v = self.client.get_internal_temperature()?;
        self.state.internal_temperature = Some(v);
        Ok(v)
    }
}

enum Consumer {
    Idle,
    Polling(StatusPoller),
    Listening(TelemetryListener),
}

impl Consumer {
    fn name(&self) -> &'static str {
        match self {
            Consumer::Idle => "idle",
            Consumer::Polling(_) => "status poller",
            Consumer::Listening(_) => "telemetry listener",
        }
    }

    /// The background thread exited without being asked to
    fn is_finished(&self) -> bool {
        match self {
            Consumer::Idle => false,
            Consumer::Polling(poller) => poller.handle.is_finished(),
            Consumer::Listening(listener) => !listener.is_running(),
        }
    }
}

/// High-level handle to one actuator board
pub struct Actuator {
    shared: Arc<Mutex<Shared>>,
    consumer: Consumer,
}

impl Actuator {
    pub fn new(client: ProtocolClient) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                client,
                state: DeviceState::default(),
            })),
            consumer: Consumer::Idle,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared>> {
        lock_shared(&self.shared)
    }

    fn with<T>(&self, f: impl FnOnce(&mut Shared) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        f(&mut guard)
    }

    // === Connection lifecycle ===

    pub fn connect(&mut self, settings: &SerialSettings) -> Result<()> {
        self.stop_consumer()?;
        info!("Connecting to {}", settings.port);
        self.with(|s| s.client.connect(settings))
    }

    /// Use an already open transport
    pub fn attach(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.stop_consumer()?;
        self.with(|s| {
            s.client.attach(transport);
            Ok(())
        })
    }

    /// Stop any background consumer and close the transport; the cache is kept
    pub fn disconnect(&mut self) -> Result<()> {
        let stopped = self.stop_consumer();
        self.with(|s| {
            s.client.disconnect();
            Ok(())
        })?;
        stopped
    }

    pub fn connection_state(&self) -> Result<ConnectionState> {
        self.with(|s| Ok(s.client.state()))
    }

    pub fn mode(&self) -> Result<CommandMode> {
        self.with(|s| Ok(s.client.mode()))
    }

    /// Copy of the cached values
    pub fn state(&self) -> Result<DeviceState> {
        self.with(|s| Ok(s.state.clone()))
    }

    /// Forget every cached value
    pub fn clear_state(&self) -> Result<()> {
        self.with(|s| {
            s.state = DeviceState::default();
            Ok(())
        })
    }

    // === Motion ===

    pub fn get_position(&self) -> Result<f32> {
        self.with(Shared::get_position)
    }

    pub fn get_velocity(&self) -> Result<f32> {
        self.with(Shared::get_velocity)
    }

    pub fn get_torque(&self) -> Result<f32> {
        self.with(Shared::get_torque)
    }

    pub fn set_position(&self, position: f32) -> Result<f32> {
        self.with(|s| {
            let applied = s.client.set_position(position)?;
            s.state.position = Some(applied);
            Ok(applied)
        })
    }

    pub fn set_velocity(&self, velocity: f32) -> Result<f32> {
        self.with(|s| {
            let applied = s.client.set_velocity(velocity)?;
            s.state.velocity = Some(applied);
            Ok(applied)
        })
    }

    pub fn set_torque(&self, torque: f32) -> Result<f32> {
        self.with(|s| {
            let applied = s.client.set_torque(torque)?;
            s.state.torque = Some(applied);
            Ok(applied)
        })
    }

    pub fn enable(&self) -> Result<()> {
        self.with(|s| {
            s.client.enable()?;
            s.state.enabled = Some(true);
            Ok(())
        })
    }

    pub fn disable(&self) -> Result<()> {
        self.with(|s| {
            s.client.disable()?;
            s.state.enabled = Some(false);
            Ok(())
        })
    }

    pub fn home(&self) -> Result<()> {
        self.with(|s| s.client.home())
    }

    pub fn stop(&self) -> Result<()> {
        self.with(|s| s.client.stop())
    }

    pub fn reset_position(&self) -> Result<()> {
        self.with(|s| s.client.reset_position())
    }

    // === PID ===

    fn get_pid(&self, pid_loop: PidLoop) -> Result<PidGains> {
        self.with(|s| {
            let gains = s.client.get_pid(pid_loop)?;
            *s.state.pid_mut(pid_loop) = Some(gains);
            Ok(gains)
        })
    }

    fn set_pid(&self, pid_loop: PidLoop, gains: PidGains) -> Result<PidGains> {
        self.with(|s| {
            let applied = s.client.set_pid(pid_loop, gains)?;
            *s.state.pid_mut(pid_loop) = Some(applied);
            Ok(applied)
        })
    }

    pub fn get_velocity_pid(&self) -> Result<PidGains> {
        self.get_pid(PidLoop::Velocity)
    }

    pub fn set_velocity_pid(&self, p: f32, i: f32, d: f32) -> Result<PidGains> {
        self.set_pid(PidLoop::Velocity, PidGains::new(p, i, d))
    }

    pub fn get_angle_pid(&self) -> Result<PidGains> {
        self.get_pid(PidLoop::Angle)
    }

    pub fn set_angle_pid(&self, p: f32, i: f32, d: f32) -> Result<PidGains> {
        self.set_pid(PidLoop::Angle, PidGains::new(p, i, d))
    }

    pub fn get_current_pid(&self) -> Result<PidGains> {
        self.get_pid(PidLoop::Current)
    }

    pub fn set_current_pid(&self, p: f32, i: f32, d: f32) -> Result<PidGains> {
        self.set_pid(PidLoop::Current, PidGains::new(p, i, d))
    }

    // === Configuration ===

    pub fn save_config(&self) -> Result<()> {
        self.with(|s| s.client.save_config())
    }

    pub fn get_downsample(&self) -> Result<i32> {
        self.with(|s| {
            let v = s.client.get_downsample()?;
            s.state.downsample = Some(v);
            Ok(v)
        })
    }

    /// 1 = every control loop, 2 = every other loop, ...
    pub fn set_downsample(&self, downsample: i32) -> Result<i32> {
        self.with(|s| {
            let v = s.client.set_downsample(downsample)?;
            s.state.downsample = Some(v);
            Ok(v)
        })
    }

    pub fn get_pole_pairs(&self) -> Result<i32> {
        self.with(|s| {
            let v = s.client.get_pole_pairs()?;
            s.state.pole_pairs = Some(v);
            Ok(v)
        })
    }

    pub fn set_pole_pairs(&self, pole_pairs: i32) -> Result<i32> {
        self.with(|s| {
            let v = s.client.set_pole_pairs(pole_pairs)?;
            s.state.pole_pairs = Some(v);
            Ok(v)
        })
    }

    pub fn get_min_angle(&self) -> Result<f32> {
        self.with(|s| {
            let v = s.client.get_min_angle()?;
            s.state.min_angle = Some(v);
            Ok(v)
        })
    }

    pub fn set_min_angle(&self, angle: f32) -> Result<f32> {
        self.with(|s| {
            let v = s.client.set_min_angle(angle)?;
            s.state.min_angle = Some(v);
            Ok(v)
        })
    }

    pub fn get_max_angle(&self) -> Result<f32> {
        self.with(|s| {
            let v = s.client.get_max_angle()?;
            s.state.max_angle = Some(v);
            Ok(v)
        })
    }

    pub fn set_max_angle(&self, angle: f32) -> Result<f32> {
        self.with(|s| {
            let v = s.client.set_max_angle(angle)?;
            s.state.max_angle = Some(v);
            Ok(v)
        })
    }

    pub fn get_torque_controller(&self) -> Result<i32> {
        self.with(|s| {
            let v = s.client.get_torque_controller()?;
            s.state.torque_controller = Some(v);
            Ok(v)
        })
    }

    pub fn set_torque_controller(&self, kind: i32) -> Result<i32> {
        self.with(|s| {
            let v = s.client.set_torque_controller(kind)?;
            s.state.torque_controller = Some(v);
            Ok(v)
        })
    }

    pub fn get_foc_modulation(&self) -> Result<i32> {
        self.with(|s| {
            let v = s.client.get_foc_modulation()?;
            s.state.foc_modulation = Some(v);
            Ok(v)
        })
    }

    pub fn set_foc_modulation(&self, kind: i32) -> Result<i32> {
        self.with(|s| {
            let v = s.client.set_foc_modulation(kind)?;
            s.state.foc_modulation = Some(v);
            Ok(v)
        })
    }

    pub fn recalibrate_sensors(&self) -> Result<()> {
        self.with(|s| s.client.recalibrate_sensors())
    }

    pub fn set_command_mode(&self, mode: CommandMode) -> Result<()> {
        self.with(|s| s.client.set_command_mode(mode))
    }

    pub fn send_raw(&self, line: &str) -> Result<String> {
        self.with(|s| s.client.send_raw(line))
    }

    // === Status ===

    pub fn get_temperature(&self) -> Result<f32> {
        self.with(Shared::get_temperature)
    }

    pub fn get_bus_voltage(&self) -> Result<f32> {
        self.with(Shared::get_bus_voltage)
    }

    pub fn get_internal_temperature(&self) -> Result<f32> {
        self.with(Shared::get_internal_temperature)
    }

    pub fn get_current_a(&self) -> Result<f32> {
        self.with(|s| s.client.get_current(Phase::A))
    }

    pub fn get_current_b(&self) -> Result<f32> {
        self.with(|s| s.client.get_current(Phase::B))
    }

    pub fn get_current_c(&self) -> Result<f32> {
        self.with(|s| s.client.get_current(Phase::C))
    }

    pub fn get_full_state(&self) -> Result<FullState> {
        self.with(|s| {
            let full = s.client.get_full_state()?;
            s.state.apply_full_state(&full);
            Ok(full)
        })
    }

    // === Background consumers ===

    /// Collect a consumer whose thread already exited on its own
    fn reap_finished(&mut self) -> Result<()> {
        if !self.consumer.is_finished() {
            return Ok(());
        }
        match std::mem::replace(&mut self.consumer, Consumer::Idle) {
            Consumer::Idle => Ok(()),
            Consumer::Polling(poller) => {
                debug!("Reaping exited status poller");
                poller.stop()
            }
            Consumer::Listening(listener) => {
                debug!("Reaping exited telemetry listener");
                self.reclaim_transport(listener).map(|_| ())
            }
        }
    }

    /// Join the listener and hand its transport back to the client
    fn reclaim_transport(&mut self, listener: TelemetryListener) -> Result<ListenStats> {
        match listener.stop() {
            Ok((transport, stats)) => {
                self.with(|s| {
                    s.client.return_transport(transport);
                    Ok(())
                })?;
                Ok(stats)
            }
            Err(e) => {
                // transport went down with the listener thread
                self.with(|s| {
                    s.client.disconnect();
                    Ok(())
                })?;
                Err(e)
            }
        }
    }

    fn ensure_idle(&mut self, requested: &'static str) -> Result<()> {
        self.reap_finished()?;
        match self.consumer {
            Consumer::Idle => Ok(()),
            ref active => Err(ProtocolError::ConsumerActive {
                requested,
                active: active.name(),
            }),
        }
    }

    /// Poll status at a fixed period on a background thread
    ///
    /// `observer` receives a cache snapshot after every cycle. Fails with
    /// `ConsumerActive` while telemetry listening runs.
    pub fn start_status_poller(
        &mut self,
        period: Duration,
        observer: impl FnMut(&DeviceState) + Send + 'static,
    ) -> Result<()> {
        self.ensure_idle("status poller")?;
        if self.connection_state()? != ConnectionState::Connected {
            return Err(ProtocolError::NotConnected);
        }
        let poller = StatusPoller::start(Arc::clone(&self.shared), period, observer);
        self.consumer = Consumer::Polling(poller);
        Ok(())
    }

    pub fn stop_status_poller(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.consumer, Consumer::Idle) {
            Consumer::Polling(poller) => poller.stop(),
            other => {
                self.consumer = other;
                Ok(())
            }
        }
    }

    /// False once the poller was stopped or exited after losing the board
    pub fn is_polling(&self) -> bool {
        matches!(self.consumer, Consumer::Polling(_)) && !self.consumer.is_finished()
    }

    /// Enable board broadcasts at `hz` and route samples to `sink`
    ///
    /// Samples carry no phase currents (reported as 0). The listener takes
    /// the transport; every other operation fails with `TransportBusy` until
    /// [`Actuator::stop_telemetry`].
    pub fn start_telemetry(
        &mut self,
        hz: f32,
        mut sink: impl FnMut(TelemetrySample) + Send + 'static,
    ) -> Result<()> {
        self.ensure_idle("telemetry listener")?;
        let transport = self.with(|s| {
            s.client.set_broadcast_frequency(hz)?;
            s.client.lend_transport()
        })?;
        info!("Broadcast enabled at {} Hz", hz);
        let forward = move |frame: BroadcastFrame, ts: f64| {
            sink(TelemetrySample::from_frame(&frame, ts));
        };
        self.consumer = Consumer::Listening(TelemetryListener::start(transport, forward));
        Ok(())
    }

    /// Stop listening, take the transport back and disable broadcasts
    pub fn stop_telemetry(&mut self) -> Result<ListenStats> {
        let listener = match std::mem::replace(&mut self.consumer, Consumer::Idle) {
            Consumer::Listening(listener) => listener,
            other => {
                self.consumer = other;
                return Ok(ListenStats::default());
            }
        };

        let stats = self.reclaim_transport(listener)?;
        self.with(|s| s.client.set_broadcast_frequency(0.0))?;
        info!("Broadcast disabled");
        Ok(stats)
    }

    pub fn listener_state(&self) -> ListenerState {
        match self.consumer {
            Consumer::Listening(ref listener) if listener.is_running() => ListenerState::Listening,
            _ => ListenerState::Idle,
        }
    }

    fn stop_consumer(&mut self) -> Result<()> {
        self.reap_finished()?;
        match self.consumer {
            Consumer::Idle => Ok(()),
            Consumer::Polling(_) => self.stop_status_poller(),
            Consumer::Listening(_) => self.stop_telemetry().map(|_| ()),
        }
    }
}

impl Drop for Actuator {
    fn drop(&mut self) {
        if let Err(e) = self.stop_consumer() {
            warn!("Failed to stop background consumer on drop: {}", e);
        }
    }
}

fn lock_shared(shared: &Mutex<Shared>) -> Result<MutexGuard<'_, Shared>> {
    shared.lock().map_err(|_| ProtocolError::PoisonedLock)
}

/// Background status reader
struct StatusPoller {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl StatusPoller {
    fn start(
        shared: Arc<Mutex<Shared>>,
        period: Duration,
        mut observer: impl FnMut(&DeviceState) + Send + 'static,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            info!("Status poller started ({:?} period)", period);
            while !flag.load(Ordering::Relaxed) {
                let started = Instant::now();
                match poll_once(&shared) {
                    Ok(snapshot) => observer(&snapshot),
                    Err(e) => {
                        warn!("Status poller exiting: {}", e);
                        break;
                    }
                }
                // sleep in short steps so stop() returns promptly
                while !flag.load(Ordering::Relaxed) && started.elapsed() < period {
                    thread::sleep(Duration::from_millis(10).min(period));
                }
            }
            info!("Status poller stopped");
        });

        Self { stop, handle }
    }

    fn stop(self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().map_err(|_| ProtocolError::PoisonedLock)
    }
}

/// One status cycle; only connection-level failures end the poller
fn poll_once(shared: &Mutex<Shared>) -> Result<DeviceState> {
    let mut s = lock_shared(shared)?;
    let reads: [(&str, fn(&mut Shared) -> Result<f32>); 6] = [
        ("position", Shared::get_position),
        ("velocity", Shared::get_velocity),
        ("torque", Shared::get_torque),
        ("temperature", Shared::get_temperature),
        ("internal temperature", Shared::get_internal_temperature),
        ("bus voltage", Shared::get_bus_voltage),
    ];

    for (what, read) in reads {
        match read(&mut s) {
            Ok(_) | Err(ProtocolError::NotSupportedInMode { .. }) => {}
            Err(e @ (ProtocolError::NotConnected | ProtocolError::Transport(_))) => return Err(e),
            Err(e) => debug!("Status read of {} failed: {}", what, e),
        }
    }
    Ok(s.state.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::protocol::ClientConfig;
    use crate::actuator::transport::mock::MockTransport;

    fn actuator(mode: CommandMode) -> (Actuator, MockTransport) {
        let mock = MockTransport::new();
        let mut actuator = Actuator::new(ProtocolClient::new(mode, ClientConfig::default()));
        actuator.attach(Box::new(mock.clone())).unwrap();
        (actuator, mock)
    }

    #[test]
    fn test_set_velocity_caches_confirmed_value() {
        let (actuator, mock) = actuator(CommandMode::HumanReadable);
        mock.push_line("set_velocity 42.0");
        assert_eq!(actuator.set_velocity(42.0).unwrap(), 42.0);
        assert_eq!(actuator.state().unwrap().velocity, Some(42.0));

        mock.push_line("set_velocity");
        assert!(actuator.set_velocity(7.0).is_err());
        assert_eq!(actuator.state().unwrap().velocity, Some(42.0));
    }

    #[test]
    fn test_failed_get_leaves_cache() {
        let (actuator, mock) = actuator(CommandMode::HumanReadable);
        assert_eq!(actuator.state().unwrap(), DeviceState::default());

        mock.push_line("get_temperature 31.5");
        assert_eq!(actuator.get_temperature().unwrap(), 31.5);
        mock.push_line("get_temperature ???");
        assert!(actuator.get_temperature().is_err());
        assert_eq!(actuator.state().unwrap().temperature, Some(31.5));
    }

    #[test]
    fn test_binary_set_caches_requested_value() {
        let (actuator, mock) = actuator(CommandMode::HighSpeedBinary);
        mock.push_rx(&[0x01]);
        assert_eq!(actuator.set_position(12.25).unwrap(), 12.25);
        assert_eq!(actuator.state().unwrap().position, Some(12.25));

        assert!(matches!(
            actuator.get_velocity_pid(),
            Err(ProtocolError::NotSupportedInMode { .. })
        ));
        assert_eq!(actuator.state().unwrap().velocity_pid, None);
    }

    #[test]
    fn test_enable_and_pid_cache() {
        let (actuator, mock) = actuator(CommandMode::HumanReadable);
        mock.push_line("enable");
        actuator.enable().unwrap();
        assert_eq!(actuator.state().unwrap().enabled, Some(true));

        mock.push_line("set_current_pid 1.0 0.1 0.0");
        actuator.set_current_pid(1.0, 0.1, 0.0).unwrap();
        mock.push_line("get_angle_pid 20 0 0.5");
        actuator.get_angle_pid().unwrap();

        let state = actuator.state().unwrap();
        assert_eq!(state.current_pid, Some(PidGains::new(1.0, 0.1, 0.0)));
        assert_eq!(state.angle_pid, Some(PidGains::new(20.0, 0.0, 0.5)));
        assert_eq!(state.velocity_pid, None);
    }

    #[test]
    fn test_full_state_updates_cache() {
        let (actuator, mock) = actuator(CommandMode::HumanReadable);
        mock.push_line("full_state 10.0 5.0 1.2 25.0 12.1 30.0 0.1 0.2 0.3");
        actuator.get_full_state().unwrap();
        let state = actuator.state().unwrap();
        assert_eq!(state.position, Some(10.0));
        assert_eq!(state.internal_temperature, Some(30.0));
    }

    #[test]
    fn test_poller_and_listener_are_exclusive() {
        let (mut actuator, mock) = actuator(CommandMode::HumanReadable);

        actuator
            .start_status_poller(Duration::from_millis(20), |_| {})
            .unwrap();
        assert!(actuator.is_polling());
        assert!(matches!(
            actuator.start_telemetry(10.0, |_| {}),
            Err(ProtocolError::ConsumerActive { .. })
        ));
        assert!(!mock.written_text().iter().any(|w| w.starts_with("broadcast")));
        actuator.stop_status_poller().unwrap();
        assert!(!actuator.is_polling());

        mock.push_line("broadcast 10.0");
        actuator.start_telemetry(10.0, |_| {}).unwrap();
        assert_eq!(actuator.listener_state(), ListenerState::Listening);
        assert!(matches!(
            actuator.start_status_poller(Duration::from_millis(20), |_| {}),
            Err(ProtocolError::ConsumerActive { .. })
        ));
        assert!(matches!(
            actuator.get_position(),
            Err(ProtocolError::TransportBusy)
        ));

        mock.reply_to("broadcast 0.0\n", "broadcast 0.0");
        actuator.stop_telemetry().unwrap();
        assert_eq!(actuator.listener_state(), ListenerState::Idle);
        assert!(mock.written_text().iter().any(|w| w == "broadcast 0.0\n"));
    }

    #[test]
    fn test_telemetry_delivers_samples() {
        let (mut actuator, mock) = actuator(CommandMode::HumanReadable);
        mock.push_line("broadcast 50.0");

        let (tx, rx) = std::sync::mpsc::channel();
        actuator
            .start_telemetry(50.0, move |sample| {
                let _ = tx.send(sample);
            })
            .unwrap();
        mock.push_line("broadcast_data 1.5 -2.0 0.25 30.0 12.0 35.0");
        let sample = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(sample.position, 1.5);
        assert_eq!(sample.velocity, -2.0);
        assert_eq!(sample.torque, 0.25);
        assert_eq!(sample.current_a, 0.0);
        assert!(sample.timestamp > 0.0);

        mock.reply_to("broadcast 0.0\n", "broadcast 0.0");
        let stats = actuator.stop_telemetry().unwrap();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.malformed, 0);
    }

    #[test]
    fn test_dead_poller_no_longer_blocks() {
        let (mut actuator, mut mock) = actuator(CommandMode::HumanReadable);
        actuator
            .start_status_poller(Duration::from_millis(10), |_| {})
            .unwrap();
        mock.close();

        let deadline = Instant::now() + Duration::from_secs(2);
        while actuator.is_polling() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!actuator.is_polling());
        // the board is gone, not busy
        assert!(matches!(
            actuator.start_telemetry(10.0, |_| {}),
            Err(ProtocolError::NotConnected)
        ));
    }

    #[test]
    fn test_dead_listener_returns_to_idle() {
        let (mut actuator, mut mock) = actuator(CommandMode::HumanReadable);
        mock.push_line("broadcast 10.0");
        actuator.start_telemetry(10.0, |_| {}).unwrap();
        mock.close();

        let deadline = Instant::now() + Duration::from_secs(2);
        while actuator.listener_state() == ListenerState::Listening && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(actuator.listener_state(), ListenerState::Idle);
        assert!(matches!(
            actuator.start_status_poller(Duration::from_millis(10), |_| {}),
            Err(ProtocolError::NotConnected)
        ));
        assert!(matches!(
            actuator.get_position(),
            Err(ProtocolError::NotConnected)
        ));
    }

    #[test]
    fn test_poller_fills_cache() {
        let (mut actuator, mock) = actuator(CommandMode::HumanReadable);
        for line in [
            "get_position 1.0",
            "get_velocity 2.0",
            "get_torque 3.0",
            "get_temperature 24.0",
            "get_internal_temperature 35.0",
            "get_bus_voltage 12.0",
        ] {
            mock.push_line(line);
        }

        let (tx, rx) = std::sync::mpsc::channel();
        actuator
            .start_status_poller(Duration::from_millis(50), move |state| {
                let _ = tx.send(state.clone());
            })
            .unwrap();
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        actuator.stop_status_poller().unwrap();

        assert_eq!(first.position, Some(1.0));
        assert_eq!(first.bus_voltage, Some(12.0));
    }

    #[test]
    fn test_poller_requires_connection() {
        let mut actuator = Actuator::new(ProtocolClient::new(
            CommandMode::HumanReadable,
            ClientConfig::default(),
        ));
        assert!(matches!(
            actuator.start_status_poller(Duration::from_millis(20), |_| {}),
            Err(ProtocolError::NotConnected)
        ));
    }

    #[test]
    fn test_disconnect_keeps_cache() {
        let (mut actuator, mock) = actuator(CommandMode::HumanReadable);
        mock.push_line("get_pole_pairs 7");
        actuator.get_pole_pairs().unwrap();
        actuator.disconnect().unwrap();
        assert_eq!(
            actuator.connection_state().unwrap(),
            ConnectionState::Disconnected
        );
        assert!(matches!(
            actuator.get_pole_pairs(),
            Err(ProtocolError::NotConnected)
        ));
        assert_eq!(actuator.state().unwrap().pole_pairs, Some(7));
    }
}
