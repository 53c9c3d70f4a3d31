//! Sensor session state machine and its poll loop.

mod controller;
mod poller;

pub use controller::{SessionController, SessionState};
