//! Host-facing surface of the sensor bridge.
//!
//! [`SensorPlugin`] exposes the operations a host application calls by name
//! plus a subscription endpoint for streaming readings. One plugin instance
//! exists per host attachment and owns the session controller.

pub mod method;

pub use method::{ErrorCode, MethodCall, PluginError};

use crate::config::SensorConfig;
use crate::driver::SensorDriver;
use crate::error::SessionError;
use crate::sensors::ReadingStream;
use crate::session::SessionController;
use crate::usb::UsbPermissions;
use log::{info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

pub struct SensorPlugin {
    controller: Arc<SessionController>,
    usb: UsbPermissions,
    config: SensorConfig,
    /// Last port and level passed to `start_sensor`, reused by `on_listen`.
    last_target: Mutex<Option<(String, i32)>>,
}

impl SensorPlugin {
    pub fn new(driver: Arc<dyn SensorDriver>, config: SensorConfig) -> Self {
        Self {
            controller: Arc::new(SessionController::new(driver, &config)),
            usb: UsbPermissions::new(),
            config,
            last_target: Mutex::new(None),
        }
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    pub fn usb(&self) -> &UsbPermissions {
        &self.usb
    }

    /// Open `port_name` with `ir_level`, or the configured default level.
    pub async fn start_sensor(
        &self,
        port_name: &str,
        ir_level: Option<i32>,
    ) -> Result<(), PluginError> {
        let level = ir_level.unwrap_or(self.config.default_ir_level);
        self.controller.start_session(port_name, level).await?;
        *self.last_target.lock() = Some((port_name.to_string(), level));
        Ok(())
    }

    pub async fn stop_sensor(&self) {
        self.controller.stop_session().await;
    }

    /// Read the sensor once, independent of any stream.
    pub async fn get_sensor_value(&self) -> Result<u16, PluginError> {
        Ok(self.controller.read_once().await?)
    }

    pub async fn get_com_list(&self) -> Result<Vec<String>, PluginError> {
        Ok(self.controller.list_ports().await?)
    }

    /// Start tracking USB permissions. Returns the authorized device count.
    pub fn initialize_usb(&self) -> usize {
        self.usb.register()
    }

    pub fn cleanup_usb(&self) {
        self.usb.unregister();
    }

    /// Begin streaming readings to a new subscriber.
    ///
    /// Opens the last started port, or the configured default port, when no
    /// session is running. The check and the open happen under the session
    /// lock, so concurrent listeners open the port once. Any previous
    /// subscriber is replaced.
    pub async fn on_listen(&self) -> Result<ReadingStream, PluginError> {
        let target = self.last_target.lock().clone().or_else(|| {
            self.config
                .default_port
                .clone()
                .map(|port| (port, self.config.default_ir_level))
        });
        let (port, level) = match &target {
            Some((port, level)) => (Some(port.as_str()), *level),
            None => (None, self.config.default_ir_level),
        };

        let opened = self.controller.start_session_if_closed(port, level).await;
        match opened {
            Ok(true) => *self.last_target.lock() = target,
            Ok(false) => {}
            Err(SessionError::NoPortOpen) => {
                return Err(PluginError::new(
                    ErrorCode::NoPort,
                    "No port configured for streaming",
                ));
            }
            Err(e) => return Err(e.into()),
        }

        let stream = self.controller.subscribe();
        if let Err(e) = self
            .controller
            .start_polling(self.controller.poll_interval())
            .await
        {
            self.controller.unsubscribe();
            return Err(e.into());
        }
        info!("[Plugin] Subscriber attached");
        Ok(stream)
    }

    /// Stop streaming and detach the subscriber. The port stays open.
    pub async fn on_cancel(&self) {
        self.controller.stop_polling().await;
        if self.controller.unsubscribe() {
            info!("[Plugin] Subscriber detached");
        }
    }

    /// Dispatch a host call by method name.
    pub async fn handle(&self, method: &str, args: Value) -> Result<Value, PluginError> {
        let call = MethodCall::parse(method, &args).inspect_err(|e| {
            warn!("[Plugin] Rejected {}: {}", method, e);
        })?;

        match call {
            MethodCall::StartSensor {
                port_name,
                ir_level,
            } => {
                self.start_sensor(&port_name, ir_level).await?;
                Ok(Value::Null)
            }
            MethodCall::StopSensor => {
                self.stop_sensor().await;
                Ok(Value::Null)
            }
            MethodCall::GetSensorValue => Ok(Value::from(self.get_sensor_value().await?)),
            MethodCall::GetComList => Ok(Value::from(self.get_com_list().await?)),
            MethodCall::InitializeUsb => Ok(Value::from(self.initialize_usb())),
            MethodCall::CleanupUsb => {
                self.cleanup_usb();
                Ok(Value::Null)
            }
        }
    }

    /// Release everything held for the host: USB listener, stream, port.
    pub async fn detach(&self) {
        self.cleanup_usb();
        self.controller.shutdown().await;
    }
}
