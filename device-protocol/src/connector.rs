use async_trait::async_trait;

use crate::error::DeviceResult;
use crate::types::{AttendanceEvent, DeviceInfo, User};

/// Explicit interface boundary in place of dynamic dispatch over a vendor
/// SDK. A real deployment implements this against the binary
/// fingerprint-device wire protocol, which is out of scope here;
/// `fake::InMemoryDeviceConnector` stands in for tests and
/// `tcp::TcpDeviceConnector` is the skeleton a vendor SDK plugs into.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Open a session. Idempotent: calling while already connected is a
    /// cheap no-op success.
    async fn connect(&mut self) -> DeviceResult<()>;

    /// Close the session. Never fails: once a disconnect is attempted the
    /// connector is treated as closed regardless of the wire outcome.
    async fn disconnect(&mut self);

    /// Liveness probe used to validate a pooled connection before reuse.
    async fn ping(&mut self) -> DeviceResult<()>;

    async fn get_users(&mut self) -> DeviceResult<Vec<User>>;

    async fn get_attendance(&mut self) -> DeviceResult<Vec<AttendanceEvent>>;

    async fn get_device_info(&mut self) -> DeviceResult<DeviceInfo>;
}
