//! Host method names, arguments and error codes.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display};
use thiserror::Error as ThisError;

/// Error codes reported to the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PortError,
    InvalidArguments,
    NoPort,
    DriverError,
    NotImplemented,
}

/// Error returned across the host boundary.
#[derive(ThisError, Debug, Clone, PartialEq, Serialize)]
#[error("{code}: {message}")]
pub struct PluginError {
    pub code: ErrorCode,
    pub message: String,
    /// Extra payload, e.g. the vendor status code of a failed open.
    pub details: Option<Value>,
}

impl PluginError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<SessionError> for PluginError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::PortError(status) => {
                PluginError::new(ErrorCode::PortError, "Failed to open port")
                    .with_details(Value::from(status))
            }
            SessionError::NoPortOpen => {
                PluginError::new(ErrorCode::NoPort, "No port is currently open")
            }
            SessionError::InvalidArguments(msg) => {
                PluginError::new(ErrorCode::InvalidArguments, msg)
            }
            other => PluginError::new(ErrorCode::DriverError, other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSensorArgs {
    port_name: String,
    #[serde(default)]
    ir_level: Option<i32>,
}

/// A parsed host method invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodCall {
    StartSensor {
        port_name: String,
        ir_level: Option<i32>,
    },
    StopSensor,
    GetSensorValue,
    GetComList,
    InitializeUsb,
    CleanupUsb,
}

impl MethodCall {
    /// Parse a method name and its JSON arguments.
    pub fn parse(method: &str, args: &Value) -> Result<Self, PluginError> {
        match method {
            "startSensor" => {
                let args: StartSensorArgs = serde_json::from_value(args.clone()).map_err(|e| {
                    PluginError::new(ErrorCode::InvalidArguments, e.to_string())
                })?;
                Ok(MethodCall::StartSensor {
                    port_name: args.port_name,
                    ir_level: args.ir_level,
                })
            }
            "stopSensor" => Ok(MethodCall::StopSensor),
            "getSensorValue" => Ok(MethodCall::GetSensorValue),
            "getComList" => Ok(MethodCall::GetComList),
            "initializeUsb" => Ok(MethodCall::InitializeUsb),
            "cleanupUsb" => Ok(MethodCall::CleanupUsb),
            other => Err(PluginError::new(
                ErrorCode::NotImplemented,
                format!("Unknown method: {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_codes_use_wire_names() {
        assert_eq!(ErrorCode::PortError.as_ref(), "PORT_ERROR");
        assert_eq!(ErrorCode::InvalidArguments.to_string(), "INVALID_ARGUMENTS");
        assert_eq!(ErrorCode::NoPort.as_ref(), "NO_PORT");
        assert_eq!(json!(ErrorCode::NotImplemented), json!("NOT_IMPLEMENTED"));
    }

    #[test]
    fn test_port_error_carries_vendor_status() {
        let err = PluginError::from(SessionError::PortError(7));
        assert_eq!(err.code, ErrorCode::PortError);
        assert_eq!(err.details, Some(json!(7)));
        assert_eq!(err.to_string(), "PORT_ERROR: Failed to open port");
    }

    #[test]
    fn test_parse_start_sensor() {
        let call = MethodCall::parse("startSensor", &json!({"portName": "COM3", "irLevel": 100}))
            .unwrap();
        assert_eq!(
            call,
            MethodCall::StartSensor {
                port_name: "COM3".into(),
                ir_level: Some(100)
            }
        );

        let call = MethodCall::parse("startSensor", &json!({"portName": "COM3"})).unwrap();
        assert_eq!(
            call,
            MethodCall::StartSensor {
                port_name: "COM3".into(),
                ir_level: None
            }
        );
    }

    #[test]
    fn test_parse_start_sensor_rejects_bad_arguments() {
        for args in [
            json!({}),
            json!({"irLevel": 100}),
            json!({"portName": "COM3", "irLevel": "high"}),
            Value::Null,
        ] {
            let err = MethodCall::parse("startSensor", &args).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidArguments, "args: {args}");
        }
    }

    #[test]
    fn test_parse_unknown_method() {
        let err = MethodCall::parse("reboot", &Value::Null).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotImplemented);
        assert_eq!(
            MethodCall::parse("getComList", &Value::Null).unwrap(),
            MethodCall::GetComList
        );
    }
}
