//! Decoded sensor readings and their delivery to the active subscriber.
//!
//! The poll loop produces [`SensorReading`]s; a [`ReadingNotifier`] hands
//! them to at most one [`ReadingStream`] at a time.

pub mod notifier;
pub mod reading;

pub use notifier::{ReadingNotifier, ReadingStream};
pub use reading::SensorReading;
