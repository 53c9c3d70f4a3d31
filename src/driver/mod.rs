//! Device driver contract for the vendor infrared sensor SDK.
//!
//! The session controller only talks to hardware through [`SensorDriver`].
//! Every call may block on USB/serial I/O, so callers are expected to run
//! them on a blocking worker rather than on an async executor thread.

pub mod simulated;

pub use simulated::{DriverCall, SimulatedDriver};

use crate::error::DriverError;

/// Size of the raw status buffer filled by the vendor SDK.
pub const STATUS_BUFFER_LEN: usize = 128;

/// Raw status block returned by [`SensorDriver::read_status`].
pub type StatusBuffer = [u8; STATUS_BUFFER_LEN];

/// Blocking interface over the vendor sensor SDK.
///
/// Implementations are not assumed to be reentrant. The session controller
/// guarantees that at most one call is in flight at a time.
pub trait SensorDriver: Send + Sync {
    /// Open a port by name. A non-zero vendor status maps to
    /// [`DriverError::PortUnavailable`].
    fn open_port(&self, name: &str) -> Result<(), DriverError>;

    /// Close a port. Best effort: the vendor API reports nothing.
    fn close_port(&self, name: &str);

    /// Configure IR sensitivity on an open port. The level is passed through
    /// unvalidated.
    fn set_threshold(&self, name: &str, level: i32);

    /// Fill `buffer` with the current status block of an open port.
    fn read_status(&self, name: &str, buffer: &mut StatusBuffer) -> Result<(), DriverError>;

    /// Enumerate device identifiers the SDK can address.
    fn list_ports(&self) -> Vec<String>;
}

/// Decode the sensor value from a status block.
///
/// Little-endian u16 at offsets 2..4. Bytes 0 and 1 are header bytes and
/// are ignored here; no checksum is applied.
pub fn decode_reading(buffer: &StatusBuffer) -> u16 {
    u16::from_le_bytes([buffer[2], buffer[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(prefix: &[u8]) -> StatusBuffer {
        let mut buffer = [0u8; STATUS_BUFFER_LEN];
        buffer[..prefix.len()].copy_from_slice(prefix);
        buffer
    }

    #[test]
    fn test_decode_little_endian_value() {
        let buffer = buffer_with(&[0xAA, 0x55, 0x34, 0x12]);
        assert_eq!(decode_reading(&buffer), 0x1234);
        assert_eq!(decode_reading(&buffer), 4660);
    }

    #[test]
    fn test_decode_max_value() {
        let buffer = buffer_with(&[0x00, 0x00, 0xFF, 0xFF]);
        assert_eq!(decode_reading(&buffer), 65535);
    }

    #[test]
    fn test_decode_ignores_header_and_trailing_bytes() {
        let mut buffer = buffer_with(&[0xDE, 0xAD, 0x01, 0x00]);
        buffer[4..].fill(0xEE);
        assert_eq!(decode_reading(&buffer), 1);
    }
}
