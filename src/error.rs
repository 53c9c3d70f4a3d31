use thiserror::Error as ThisError;
use tokio::task::JoinError;

/// Failures reported by a [`SensorDriver`](crate::driver::SensorDriver).
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Vendor open call returned a non-zero status code.
    #[error("Port unavailable (vendor status {0})")]
    PortUnavailable(i32),

    /// Operation addressed a port the driver does not hold open.
    #[error("Port not open: {0}")]
    PortNotOpen(String),

    #[error("Driver I/O error: {0}")]
    Io(String),
}

#[derive(ThisError, Debug)]
pub enum SessionError {
    #[error("Failed to open port (vendor status {0})")]
    PortError(i32),

    #[error("No port is currently open")]
    NoPortOpen,

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Driver communication failed: {0}")]
    DriverIo(String),

    #[error("Driver worker failed: {0}")]
    Worker(#[from] JoinError),
}

impl From<DriverError> for SessionError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::PortUnavailable(code) => SessionError::PortError(code),
            other => SessionError::DriverIo(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_unavailable_maps_to_port_error() {
        let err: SessionError = DriverError::PortUnavailable(7).into();
        assert!(matches!(err, SessionError::PortError(7)));
    }

    #[test]
    fn test_io_failures_map_to_driver_io() {
        let err: SessionError = DriverError::Io("timeout".into()).into();
        match err {
            SessionError::DriverIo(msg) => assert!(msg.contains("timeout")),
            other => panic!("unexpected error: {other:?}"),
        }

        let err: SessionError = DriverError::PortNotOpen("COM3".into()).into();
        assert!(matches!(err, SessionError::DriverIo(_)));
    }
}
