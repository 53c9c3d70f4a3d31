use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default poll interval for the subscription stream.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
/// IR threshold applied when a caller does not supply one.
pub const DEFAULT_IR_LEVEL: i32 = 100;
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;

/// Load `KEY=value` pairs from a `.env` file in the working directory.
///
/// Variables already present in the environment win. Must run before the
/// async runtime starts any threads. Returns how many variables were set.
pub fn load_dotenv() -> usize {
    let Ok(content) = fs::read_to_string(Path::new(".env")) else {
        return 0;
    };

    let mut applied = 0;
    for (key, value) in parse_dotenv(&content) {
        if std::env::var_os(key).is_none() {
            // SAFETY: called from main before any other thread exists.
            unsafe { std::env::set_var(key, value) };
            applied += 1;
        }
    }
    applied
}

fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (key.trim(), unquoted)
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub sensor: SensorConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Port opened by a subscription when no session is running.
    pub default_port: Option<String>,
    pub default_ir_level: i32,
    pub poll_interval_ms: u64,
    /// Readings buffered for a slow subscriber before new ones are dropped.
    pub subscriber_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub ports: Vec<String>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            default_port: None,
            default_ir_level: DEFAULT_IR_LEVEL,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ports: vec!["COM3".to_string(), "COM4".to_string()],
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. Values that fail
    /// to parse keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("SENSOR_PORT")
            && !port.trim().is_empty()
        {
            config.sensor.default_port = Some(port.trim().to_string());
        }
        if let Some(level) = lookup("SENSOR_IR_LEVEL")
            && let Ok(l) = level.trim().parse()
        {
            config.sensor.default_ir_level = l;
        }
        if let Some(interval) = lookup("SENSOR_POLL_INTERVAL_MS")
            && let Ok(ms) = interval.trim().parse::<u64>()
            && ms > 0
        {
            config.sensor.poll_interval_ms = ms;
        }
        if let Some(buffer) = lookup("SENSOR_SUBSCRIBER_BUFFER")
            && let Ok(b) = buffer.trim().parse::<usize>()
            && b > 0
        {
            config.sensor.subscriber_buffer = b;
        }

        if let Some(ports) = lookup("SENSOR_SIM_PORTS") {
            let ports: Vec<String> = ports
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
            if !ports.is_empty() {
                config.simulation.ports = ports;
            }
        }

        config
    }
}
