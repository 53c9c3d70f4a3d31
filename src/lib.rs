//! Infrared sensor bridge library.
//!
//! Manages a single session against a USB infrared sensor: open a port,
//! configure its threshold, poll and decode readings, and hand them to one
//! subscriber at a time.

pub mod config;
pub mod driver;
pub mod error;
pub mod plugin;
pub mod sensors;
pub mod session;
pub mod usb;
