use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::connector::DeviceConnector;
use crate::error::{DeviceError, DeviceResult};
use crate::types::{AttendanceEvent, DeviceInfo, User};

/// Per-operation timeouts for a `TcpDeviceConnector`: connect, ping, and
/// read each carry their own budget instead of sharing one.
#[derive(Debug, Clone, Copy)]
pub struct TcpTimeouts {
    pub connect: Duration,
    pub ping: Duration,
    pub read: Duration,
}

impl Default for TcpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(3),
            ping: Duration::from_secs(1),
            read: Duration::from_secs(10),
        }
    }
}

/// Skeleton `DeviceConnector` over a raw TCP socket to one fingerprint
/// device. The binary wire protocol itself (framing, command codes, the
/// vendor's record encoding) is out of scope here; this type owns only
/// connection lifecycle and the timeout/error mapping the Device Adapter
/// depends on. A real deployment plugs a vendor SDK's framing in at the
/// marked points.
pub struct TcpDeviceConnector {
    name: String,
    addr: (String, u16),
    timeouts: TcpTimeouts,
    stream: Option<TcpStream>,
}

impl TcpDeviceConnector {
    pub fn new(name: impl Into<String>, ip: impl Into<String>, port: u16, timeouts: TcpTimeouts) -> Self {
        Self {
            name: name.into(),
            addr: (ip.into(), port),
            timeouts,
            stream: None,
        }
    }
}

#[async_trait]
impl DeviceConnector for TcpDeviceConnector {
    async fn connect(&mut self) -> DeviceResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let (host, port) = &self.addr;
        let fut = TcpStream::connect((host.as_str(), *port));
        match timeout(self.timeouts.connect, fut).await {
            Ok(Ok(stream)) => {
                debug!(device = %self.name, "device session opened");
                self.stream = Some(stream);
                Ok(())
            }
            Ok(Err(_)) => Err(DeviceError::Unreachable(self.name.clone())),
            Err(_) => Err(DeviceError::Timeout(self.name.clone())),
        }
    }

    async fn disconnect(&mut self) {
        self.stream = None;
    }

    async fn ping(&mut self) -> DeviceResult<()> {
        let Some(_stream) = self.stream.as_mut() else {
            return Err(DeviceError::Unreachable(self.name.clone()));
        };
        // A real implementation writes the vendor's keep-alive frame here
        // and reads its reply within `self.timeouts.ping`; we have no wire
        // protocol to speak, so an open socket is treated as live.
        Ok(())
    }

    async fn get_users(&mut self) -> DeviceResult<Vec<User>> {
        if self.stream.is_none() {
            return Err(DeviceError::Unreachable(self.name.clone()));
        }
        Err(DeviceError::ProtocolError {
            device: self.name.clone(),
            detail: "get_users requires a vendor wire-protocol implementation".to_string(),
        })
    }

    async fn get_attendance(&mut self) -> DeviceResult<Vec<AttendanceEvent>> {
        if self.stream.is_none() {
            return Err(DeviceError::Unreachable(self.name.clone()));
        }
        Err(DeviceError::ProtocolError {
            device: self.name.clone(),
            detail: "get_attendance requires a vendor wire-protocol implementation".to_string(),
        })
    }

    async fn get_device_info(&mut self) -> DeviceResult<DeviceInfo> {
        if self.stream.is_none() {
            return Err(DeviceError::Unreachable(self.name.clone()));
        }
        Err(DeviceError::ProtocolError {
            device: self.name.clone(),
            detail: "get_device_info requires a vendor wire-protocol implementation".to_string(),
        })
    }
}
