//! In-process stand-in for the vendor SDK.
//!
//! Used by the binaries when no hardware is attached and by the test suite.
//! Readings are either scripted or generated as a slow sawtooth around the
//! configured threshold.

use super::{STATUS_BUFFER_LEN, SensorDriver, StatusBuffer};
use crate::error::DriverError;
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Vendor status for a port name the SDK does not know.
pub const STATUS_NOT_FOUND: i32 = -1;
/// Vendor status for a port that is already held open.
pub const STATUS_BUSY: i32 = -2;

/// One recorded call into the driver, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Open(String),
    Close(String),
    SetThreshold(String, i32),
    ReadStatus(String),
    ListPorts,
}

#[derive(Default)]
struct SimState {
    ports: Vec<String>,
    open: HashSet<String>,
    open_failures: HashMap<String, i32>,
    thresholds: HashMap<String, i32>,
    script: VecDeque<u16>,
    failing_reads: u32,
    generated: u32,
    journal: Vec<DriverCall>,
}

/// Simulated infrared sensor driver.
pub struct SimulatedDriver {
    state: Mutex<SimState>,
    read_latency: Duration,
    in_read: AtomicBool,
    overlapping_reads: AtomicU32,
    panic_on_threshold: AtomicBool,
}

impl SimulatedDriver {
    /// Create a driver exposing the given port names.
    pub fn new<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Mutex::new(SimState {
                ports: ports.into_iter().map(Into::into).collect(),
                ..Default::default()
            }),
            read_latency: Duration::ZERO,
            in_read: AtomicBool::new(false),
            overlapping_reads: AtomicU32::new(0),
            panic_on_threshold: AtomicBool::new(false),
        }
    }

    /// Block every `read_status` call for `latency`, like real hardware.
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = latency;
        self
    }

    /// Make every subsequent open of `port` fail with vendor status `code`.
    pub fn fail_open(&self, port: &str, code: i32) {
        self.state.lock().open_failures.insert(port.to_string(), code);
    }

    /// Queue raw sensor values returned by the next reads, in order.
    pub fn push_readings<I: IntoIterator<Item = u16>>(&self, values: I) {
        self.state.lock().script.extend(values);
    }

    /// Make the next `count` reads fail with an I/O error.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().failing_reads = count;
    }

    /// Make the next `set_threshold` call panic, as a crashing vendor
    /// library would.
    pub fn panic_next_threshold(&self) {
        self.panic_on_threshold.store(true, Ordering::SeqCst);
    }

    pub fn is_open(&self, port: &str) -> bool {
        self.state.lock().open.contains(port)
    }

    pub fn threshold(&self, port: &str) -> Option<i32> {
        self.state.lock().thresholds.get(port).copied()
    }

    /// Every call made so far.
    pub fn journal(&self) -> Vec<DriverCall> {
        self.state.lock().journal.clone()
    }

    pub fn read_count(&self) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|call| matches!(call, DriverCall::ReadStatus(_)))
            .count()
    }

    /// Number of `read_status` calls that started while another was running.
    pub fn overlapping_reads(&self) -> u32 {
        self.overlapping_reads.load(Ordering::SeqCst)
    }

    fn next_value(state: &mut SimState, port: &str) -> u16 {
        if let Some(value) = state.script.pop_front() {
            return value;
        }
        let base = state.thresholds.get(port).copied().unwrap_or(0).max(0) as u16;
        state.generated = state.generated.wrapping_add(1);
        base.wrapping_add(((state.generated % 32) * 16) as u16)
    }
}

impl SensorDriver for SimulatedDriver {
    fn open_port(&self, name: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        state.journal.push(DriverCall::Open(name.to_string()));

        if let Some(code) = state.open_failures.get(name) {
            return Err(DriverError::PortUnavailable(*code));
        }
        if !state.ports.iter().any(|p| p == name) {
            return Err(DriverError::PortUnavailable(STATUS_NOT_FOUND));
        }
        if !state.open.insert(name.to_string()) {
            return Err(DriverError::PortUnavailable(STATUS_BUSY));
        }
        debug!("[Sim] Opened {}", name);
        Ok(())
    }

    fn close_port(&self, name: &str) {
        let mut state = self.state.lock();
        state.journal.push(DriverCall::Close(name.to_string()));
        state.open.remove(name);
        state.thresholds.remove(name);
        debug!("[Sim] Closed {}", name);
    }

    fn set_threshold(&self, name: &str, level: i32) {
        {
            let mut state = self.state.lock();
            state
                .journal
                .push(DriverCall::SetThreshold(name.to_string(), level));
            if state.open.contains(name) {
                state.thresholds.insert(name.to_string(), level);
            }
        }
        if self.panic_on_threshold.swap(false, Ordering::SeqCst) {
            panic!("vendor library crashed in SetThresholdValue({name})");
        }
    }

    fn read_status(&self, name: &str, buffer: &mut StatusBuffer) -> Result<(), DriverError> {
        if self.in_read.swap(true, Ordering::SeqCst) {
            self.overlapping_reads.fetch_add(1, Ordering::SeqCst);
        }
        if !self.read_latency.is_zero() {
            std::thread::sleep(self.read_latency);
        }

        let result = {
            let mut state = self.state.lock();
            state.journal.push(DriverCall::ReadStatus(name.to_string()));

            if !state.open.contains(name) {
                Err(DriverError::PortNotOpen(name.to_string()))
            } else if state.failing_reads > 0 {
                state.failing_reads -= 1;
                Err(DriverError::Io(format!("read timeout on {name}")))
            } else {
                let value = Self::next_value(&mut state, name);
                *buffer = [0u8; STATUS_BUFFER_LEN];
                buffer[0] = 0xA5;
                buffer[1] = 0x5A;
                buffer[2..4].copy_from_slice(&value.to_le_bytes());
                Ok(())
            }
        };

        self.in_read.store(false, Ordering::SeqCst);
        result
    }

    fn list_ports(&self) -> Vec<String> {
        let mut state = self.state.lock();
        state.journal.push(DriverCall::ListPorts);
        state.ports.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::decode_reading;

    #[test]
    fn test_open_unknown_port_fails() {
        let driver = SimulatedDriver::new(["COM3"]);
        assert_eq!(
            driver.open_port("COM9"),
            Err(DriverError::PortUnavailable(STATUS_NOT_FOUND))
        );
        assert!(!driver.is_open("COM9"));
    }

    #[test]
    fn test_open_twice_reports_busy() {
        let driver = SimulatedDriver::new(["COM3"]);
        assert!(driver.open_port("COM3").is_ok());
        assert_eq!(
            driver.open_port("COM3"),
            Err(DriverError::PortUnavailable(STATUS_BUSY))
        );
    }

    #[test]
    fn test_injected_open_failure() {
        let driver = SimulatedDriver::new(["COM3"]);
        driver.fail_open("COM3", 7);
        assert_eq!(driver.open_port("COM3"), Err(DriverError::PortUnavailable(7)));
    }

    #[test]
    fn test_scripted_readings_are_encoded_little_endian() {
        let driver = SimulatedDriver::new(["COM3"]);
        driver.open_port("COM3").unwrap();
        driver.push_readings([0x1234, 42]);

        let mut buffer = [0u8; STATUS_BUFFER_LEN];
        driver.read_status("COM3", &mut buffer).unwrap();
        assert_eq!(&buffer[2..4], &[0x34, 0x12]);
        assert_eq!(decode_reading(&buffer), 0x1234);

        driver.read_status("COM3", &mut buffer).unwrap();
        assert_eq!(decode_reading(&buffer), 42);
    }

    #[test]
    fn test_read_requires_open_port() {
        let driver = SimulatedDriver::new(["COM3"]);
        let mut buffer = [0u8; STATUS_BUFFER_LEN];
        assert!(matches!(
            driver.read_status("COM3", &mut buffer),
            Err(DriverError::PortNotOpen(_))
        ));
    }

    #[test]
    fn test_injected_read_failures_recover() {
        let driver = SimulatedDriver::new(["COM3"]);
        driver.open_port("COM3").unwrap();
        driver.fail_next_reads(1);

        let mut buffer = [0u8; STATUS_BUFFER_LEN];
        assert!(matches!(
            driver.read_status("COM3", &mut buffer),
            Err(DriverError::Io(_))
        ));
        assert!(driver.read_status("COM3", &mut buffer).is_ok());
    }

    #[test]
    fn test_close_forgets_threshold() {
        let driver = SimulatedDriver::new(["COM3"]);
        driver.open_port("COM3").unwrap();
        driver.set_threshold("COM3", 120);
        assert_eq!(driver.threshold("COM3"), Some(120));

        driver.close_port("COM3");
        assert!(!driver.is_open("COM3"));
        assert_eq!(driver.threshold("COM3"), None);
        assert_eq!(
            driver.journal(),
            vec![
                DriverCall::Open("COM3".into()),
                DriverCall::SetThreshold("COM3".into(), 120),
                DriverCall::Close("COM3".into()),
            ]
        );
    }
}
