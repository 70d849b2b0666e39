//! Record sensor readings until Ctrl+C.
//!
//! Run with: cargo run --example record_readings [config.json]

use distance_sensor_ble::{Result, SensorConfig, SensorService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("distance_sensor_ble=info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SensorConfig::load_or_default(path)?,
        None => SensorConfig::default(),
    };

    println!("Sensor Recorder");
    println!("===============\n");
    println!("Logging readings to {}", config.log_path.display());
    println!("Press Ctrl+C to exit.\n");

    let service = SensorService::new(config).await?;
    let mut states = service.subscribe_connection_state();
    let mut readings = service.subscribe_readings();

    service.start()?;
    service.start_recording();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            Ok(state) = states.recv() => {
                if state.is_connected() {
                    println!("Connected to Sensor ({})", state);
                } else {
                    println!("Scanning for Sensor... ({})", state);
                }
            }
            Ok(reading) = readings.recv() => {
                println!("Distance: {} cm", reading.distance);
                println!("Flux: {}", reading.flux);
                println!("Temperature: {} °C", reading.temperature);
                if let Some(at) = reading.captured_at() {
                    println!("Captured: {}", at.to_rfc3339());
                }
                println!();
            }
        }
    }

    service.stop_recording();
    service.shutdown().await?;

    Ok(())
}
