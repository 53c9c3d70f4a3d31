use clap::Parser;
use ir_sensor_bridge::config::{self, Config};
use ir_sensor_bridge::driver::SimulatedDriver;
use ir_sensor_bridge::plugin::SensorPlugin;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::signal;

/// Stream infrared sensor readings until interrupted.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Port to open (overrides SENSOR_PORT).
    #[arg(long)]
    port: Option<String>,

    /// IR threshold applied after opening (overrides SENSOR_IR_LEVEL).
    #[arg(long)]
    ir_level: Option<i32>,

    /// Poll interval in milliseconds (overrides SENSOR_POLL_INTERVAL_MS).
    #[arg(long)]
    interval_ms: Option<u64>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    // Runs before the runtime exists, so no other thread reads the env.
    let loaded = config::load_dotenv();
    init_logger();
    if loaded > 0 {
        info!("Loaded {} variable(s) from .env", loaded);
    }
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };
    runtime.block_on(run(cli));
}

async fn run(cli: Cli) {
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.sensor.default_port = Some(port);
    }
    if let Some(level) = cli.ir_level {
        config.sensor.default_ir_level = level;
    }
    if let Some(ms) = cli.interval_ms.filter(|ms| *ms > 0) {
        config.sensor.poll_interval_ms = ms;
    }

    info!("Starting IR sensor bridge");
    info!("  Ports: {}", config.simulation.ports.join(", "));
    info!(
        "  Port: {}",
        config.sensor.default_port.as_deref().unwrap_or("<none>")
    );
    info!("  IR level: {}", config.sensor.default_ir_level);
    info!("  Poll interval: {} ms", config.sensor.poll_interval_ms);

    let driver = Arc::new(SimulatedDriver::new(config.simulation.ports.clone()));
    let plugin = SensorPlugin::new(driver, config.sensor.clone());

    let mut stream = match plugin.on_listen().await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to start streaming: {}", e);
            std::process::exit(1);
        }
    };

    info!("Streaming readings, press Ctrl+C to exit");
    loop {
        tokio::select! {
            reading = stream.recv() => match reading {
                Some(reading) => info!(
                    "[{}] {} = {}",
                    reading.read_at.format("%H:%M:%S%.3f"),
                    reading.port,
                    reading.value
                ),
                None => {
                    warn!("Reading stream ended");
                    break;
                }
            },
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Received shutdown signal");
                break;
            }
        }
    }

    plugin.on_cancel().await;
    plugin.detach().await;
    info!("IR sensor bridge stopped");
}
