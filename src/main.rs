use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use open_actuator::actuator::{
    Actuator, ClientConfig, CommandMode, ProtocolClient, SerialSettings, list_ports,
};
use open_actuator::config::{DEFAULT_BAUDRATE, LEGACY_SETTLE_DELAY};
use open_actuator::runtime::{self, BridgeMode};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Text,
    Binary,
    Passthrough,
}

impl From<ModeArg> for CommandMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Text => CommandMode::HumanReadable,
            ModeArg::Binary => CommandMode::HighSpeedBinary,
            ModeArg::Passthrough => CommandMode::SimpleFocPassthrough,
        }
    }
}

/// Host tool for the open-source actuator board
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Serial port of the board
    #[arg(long, global = true)]
    port: Option<String>,

    #[arg(long, global = true, default_value_t = DEFAULT_BAUDRATE)]
    baud: u32,

    /// Read timeout in milliseconds
    #[arg(long, global = true, default_value_t = 1000)]
    timeout_ms: u64,

    /// Encoding the board is currently using
    #[arg(long, global = true, value_enum, default_value_t = ModeArg::Text)]
    mode: ModeArg,

    /// Pause between request and reply (0 for current firmware)
    #[arg(long, global = true, default_value_t = 0)]
    settle_ms: u64,

    /// Use the settle delay older firmware needs
    #[arg(long, global = true)]
    legacy: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// List serial ports
    Ports,
    /// Read and print the full device state
    Status,
    /// Send one raw line and print the reply
    Send { line: String },
    /// Run the zenoh bridge
    Run {
        /// Forward board broadcasts at this rate instead of polling
        #[arg(long)]
        stream_hz: Option<f32>,
    },
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let settle_delay = if self.legacy {
            LEGACY_SETTLE_DELAY
        } else {
            Duration::from_millis(self.settle_ms)
        };
        ClientConfig {
            settle_delay,
            ..ClientConfig::default()
        }
    }

    fn connect(&self) -> Result<Actuator, Box<dyn std::error::Error + Send + Sync>> {
        let port = self.port.clone().ok_or("--port is required")?;
        let settings = SerialSettings::new(port)
            .with_baud_rate(self.baud)
            .with_timeout(Duration::from_millis(self.timeout_ms));

        let mut actuator = Actuator::new(ProtocolClient::new(
            self.mode.into(),
            self.client_config(),
        ));
        actuator.connect(&settings)?;
        Ok(actuator)
    }
}

async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match cli.command {
        Cmd::Ports => {
            for port in list_ports()? {
                println!("{}", port);
            }
        }
        Cmd::Status => {
            let actuator = cli.connect()?;
            match actuator.get_full_state() {
                Ok(_) => {}
                // binary mode has no full_state; read the basics one by one
                Err(e) => {
                    info!("Full state unavailable ({}), reading individually", e);
                    actuator.get_position()?;
                    actuator.get_velocity()?;
                    actuator.get_torque()?;
                }
            }
            println!("{}", serde_json::to_string_pretty(&actuator.state()?)?);
        }
        Cmd::Send { ref line } => {
            let actuator = cli.connect()?;
            println!("{}", actuator.send_raw(line)?);
        }
        Cmd::Run { stream_hz } => {
            let actuator = cli.connect()?;
            let mode = match stream_hz {
                Some(hz) => BridgeMode::Stream { hz },
                None => BridgeMode::Poll,
            };
            runtime::run(actuator, mode).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init(); // installs the subscriber globally

    if let Err(e) = dispatch(Cli::parse()).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
