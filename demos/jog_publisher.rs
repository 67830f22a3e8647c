// Keyboard jog: A/D spin, E enable, X disable, H home, SPACE stop, R/F speed, Q quit
//
// Publishes ActuatorCommand JSON to the bridge. While a jog key is held a
// velocity setpoint goes out at ~50 Hz; on release one stop is sent.

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use open_actuator::config::TOPIC_CMD;
use open_actuator::messages::ActuatorCommand;
use std::time::{Duration, Instant};
use tracing::info;

const SPEEDS: [f32; 3] = [1.0, 5.0, 20.0]; // rad/s
const INPUT_TIMEOUT_MS: u64 = 100; // Stop jogging after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    info!("Controls: A/D=jog, E=enable, X=disable, H=home, SPACE=stop, R/F=speed, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_jog(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn publish(
    publisher: &zenoh::pubsub::Publisher<'_>,
    cmd: &ActuatorCommand,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(serde_json::to_string(cmd)?).await?;
    Ok(())
}

async fn run_jog(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut velocity = 0.0;
    let mut jogging = false;
    let mut last_jog_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('a') if pressed => {
                        velocity = -SPEEDS[speed_idx];
                        jogging = true;
                        last_jog_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        velocity = SPEEDS[speed_idx];
                        jogging = true;
                        last_jog_input = Instant::now();
                    }

                    // One-shot commands
                    KeyCode::Char('e') if pressed => {
                        publish(publisher, &ActuatorCommand::Enable).await?
                    }
                    KeyCode::Char('x') if pressed => {
                        publish(publisher, &ActuatorCommand::Disable).await?
                    }
                    KeyCode::Char('h') if pressed => {
                        publish(publisher, &ActuatorCommand::Home).await?
                    }
                    KeyCode::Char(' ') if pressed => {
                        jogging = false;
                        publish(publisher, &ActuatorCommand::Stop).await?;
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(SPEEDS.len() - 1);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if !jogging {
            continue;
        }
        if last_jog_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            jogging = false;
            publish(publisher, &ActuatorCommand::Stop).await?;
        } else {
            publish(publisher, &ActuatorCommand::SetVelocity { value: velocity }).await?;
        }
    }

    publish(publisher, &ActuatorCommand::Stop).await?;
    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {} ({} rad/s)", label, SPEEDS[idx]);
}
