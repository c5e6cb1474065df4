use thiserror::Error;

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Typed failures the device adapter can raise: on timeout or protocol
/// error the adapter raises one of these instead of a raw I/O error.
#[derive(Debug, Error, Clone)]
pub enum DeviceError {
    #[error("device '{0}' is unreachable")]
    Unreachable(String),
    #[error("protocol error talking to device '{device}': {detail}")]
    ProtocolError { device: String, detail: String },
    #[error("operation on device '{0}' timed out")]
    Timeout(String),
}

impl DeviceError {
    pub fn device_name(&self) -> &str {
        match self {
            DeviceError::Unreachable(name) => name,
            DeviceError::ProtocolError { device, .. } => device,
            DeviceError::Timeout(name) => name,
        }
    }

    /// Stable reason string embedded in fan-out/failure metadata for both
    /// per-device and per-Location failure reporting.
    pub fn reason(&self) -> &'static str {
        match self {
            DeviceError::Unreachable(_) => "unreachable",
            DeviceError::ProtocolError { .. } => "protocol_error",
            DeviceError::Timeout(_) => "timeout",
        }
    }
}
