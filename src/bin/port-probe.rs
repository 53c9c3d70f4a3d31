//! List sensor ports and take a few one-shot readings.
//!
//! Usage:
//!   cargo run --bin port-probe -- --port COM3 --reads 3
//!
//! Without `--port` only the port list is printed.

use clap::Parser;
use ir_sensor_bridge::config::{Config, DEFAULT_IR_LEVEL};
use ir_sensor_bridge::driver::SimulatedDriver;
use ir_sensor_bridge::session::SessionController;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(about = "Probe infrared sensor ports")]
struct Cli {
    /// Port to open and read from.
    #[arg(long, env = "SENSOR_PORT")]
    port: Option<String>,

    #[arg(long, env = "SENSOR_IR_LEVEL", default_value_t = DEFAULT_IR_LEVEL)]
    ir_level: i32,

    /// Number of readings to take.
    #[arg(long, default_value_t = 1)]
    reads: u32,

    /// Pause between readings in milliseconds.
    #[arg(long, default_value_t = 500)]
    delay_ms: u64,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = Config::from_env();

    let driver = Arc::new(SimulatedDriver::new(config.simulation.ports.clone()));
    let controller = SessionController::new(driver, &config.sensor);

    match controller.list_ports().await {
        Ok(ports) if ports.is_empty() => warn!("No ports found"),
        Ok(ports) => {
            for port in ports {
                info!("Port: {}", port);
            }
        }
        Err(e) => error!("Failed to list ports: {}", e),
    }

    let Some(port) = cli.port else {
        return;
    };

    if let Err(e) = controller.start_session(&port, cli.ir_level).await {
        error!("Cannot open {}: {}", port, e);
        std::process::exit(1);
    }

    for i in 0..cli.reads {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(cli.delay_ms)).await;
        }
        match controller.read_once().await {
            Ok(value) => info!("{} reading {}: {} (0x{:04X})", port, i + 1, value, value),
            Err(e) => warn!("{} reading {} failed: {}", port, i + 1, e),
        }
    }

    controller.shutdown().await;
}
