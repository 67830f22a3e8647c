// Actuator diagnostic: READ-ONLY check of the board connection
//
// This tool only issues get_* commands - nothing moves, nothing is saved.
// Use this first before running production_test.
//
// Usage: cargo run --example actuator_diagnostic -- [port]
// Example: cargo run --example actuator_diagnostic -- /dev/ttyACM0

use open_actuator::actuator::{
    Actuator, ClientConfig, CommandMode, ProtocolClient, SerialSettings, list_ports,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    // Get port from args or use default
    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyACM0".to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            Actuator Diagnostic (READ-ONLY)                   ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  This tool only READS from the board - no writes, no motion  ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    println!("Available ports:");
    match list_ports() {
        Ok(ports) if ports.is_empty() => println!("  (none)"),
        Ok(ports) => ports.iter().for_each(|p| println!("  {}", p)),
        Err(e) => println!("  ERROR - {}", e),
    }
    println!();
    println!("Serial port: {}", port);
    println!();

    // Try to open serial port
    println!("Step 1: Opening serial port...");
    let mut actuator = Actuator::new(ProtocolClient::new(
        CommandMode::HumanReadable,
        ClientConfig::default(),
    ));
    if let Err(e) = actuator.connect(&SerialSettings::new(&port)) {
        println!("  ✗ Failed to open serial port: {}", e);
        println!();
        println!("Troubleshooting:");
        println!("  - Check the port path is correct");
        println!("  - Verify the USB cable is connected");
        println!("  - On Linux, make sure you are in the dialout group");
        return Err(e.into());
    }
    println!("  ✓ Serial port opened successfully");
    println!();

    // A full_state read proves the board answers in text mode
    println!("Step 2: Reading full state...");
    match actuator.get_full_state() {
        Ok(full) => {
            println!("  ✓ RESPONDING");
            println!("    Position:      {:.3}", full.position);
            println!("    Velocity:      {:.3}", full.velocity);
            println!("    Torque:        {:.3}", full.torque);
            println!("    Temperature:   {:.1} °C", full.temperature);
            println!("    Bus voltage:   {:.2} V", full.bus_voltage);
            println!("    Internal temp: {:.1} °C", full.internal_temperature);
            println!(
                "    Currents:      {:.3} / {:.3} / {:.3} A",
                full.current_a, full.current_b, full.current_c
            );
        }
        Err(e) => {
            println!("  ✗ ERROR: {}", e);
            println!("  - Is the board in human-readable mode?");
            println!("  - Check the baud rate (default 2000000)");
        }
    }
    println!();

    println!("Step 3: Reading configuration...");
    match actuator.get_pole_pairs() {
        Ok(v) => println!("    Pole pairs:        {}", v),
        Err(e) => println!("    Pole pairs:        ERROR - {}", e),
    }
    match actuator.get_downsample() {
        Ok(v) => println!("    Downsample:        {}", v),
        Err(e) => println!("    Downsample:        ERROR - {}", e),
    }
    match actuator.get_min_angle() {
        Ok(v) => println!("    Min angle:         {}", v),
        Err(e) => println!("    Min angle:         ERROR - {}", e),
    }
    match actuator.get_max_angle() {
        Ok(v) => println!("    Max angle:         {}", v),
        Err(e) => println!("    Max angle:         ERROR - {}", e),
    }
    match actuator.get_torque_controller() {
        Ok(v) => println!("    Torque controller: {}", v),
        Err(e) => println!("    Torque controller: ERROR - {}", e),
    }
    match actuator.get_foc_modulation() {
        Ok(v) => println!("    FOC modulation:    {}", v),
        Err(e) => println!("    FOC modulation:    ERROR - {}", e),
    }
    for (name, gains) in [
        ("Velocity PID", actuator.get_velocity_pid()),
        ("Angle PID   ", actuator.get_angle_pid()),
        ("Current PID ", actuator.get_current_pid()),
    ] {
        match gains {
            Ok(g) => println!("    {}:      p={} i={} d={}", name, g.p, g.i, g.d),
            Err(e) => println!("    {}:      ERROR - {}", name, e),
        }
    }
    println!();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Diagnostic Complete                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Cached state:");
    println!("{}", serde_json::to_string_pretty(&actuator.state()?)?);
    println!();
    println!("Next step: Run 'cargo run --example production_test' with the rotor FREE to spin");

    actuator.disconnect()?;
    Ok(())
}
