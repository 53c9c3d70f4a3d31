use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded infrared sensor value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Port the value was read from.
    pub port: String,
    /// Raw sensor value.
    pub value: u16,
    pub read_at: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(port: impl Into<String>, value: u16) -> Self {
        Self {
            port: port.into(),
            value,
            read_at: Utc::now(),
        }
    }
}
