use async_trait::async_trait;

use crate::connector::DeviceConnector;
use crate::error::{DeviceError, DeviceResult};
use crate::types::{AttendanceEvent, DeviceInfo, User};

/// A connector backed by canned data instead of a real socket, used by
/// Location Service tests and by the `fake-devices` feature some
/// deployments run in staging without real hardware attached. Stands in
/// for the vendor SDK's `connect/disconnect/get_users/get_attendance/
/// get_device_info` surface.
pub struct InMemoryDeviceConnector {
    name: String,
    connected: bool,
    /// When set, every call fails with this error instead of returning data,
    /// for exercising the adapter's `Unreachable`/`Timeout` handling.
    fail_with: Option<DeviceError>,
    users: Vec<User>,
    events: Vec<AttendanceEvent>,
    info: DeviceInfo,
}

impl InMemoryDeviceConnector {
    pub fn new(name: impl Into<String>, users: Vec<User>, events: Vec<AttendanceEvent>) -> Self {
        let name = name.into();
        let info = DeviceInfo {
            name: name.clone(),
            model: Some("fake-v1".to_string()),
            firmware_version: Some("0.0.0".to_string()),
            user_count: Some(users.len() as u32),
            record_count: Some(events.len() as u32),
        };
        Self {
            name,
            connected: false,
            fail_with: None,
            users,
            events,
            info,
        }
    }

    pub fn failing(name: impl Into<String>, error: DeviceError) -> Self {
        let name = name.into();
        Self {
            name: name.clone(),
            connected: false,
            fail_with: Some(error),
            users: Vec::new(),
            events: Vec::new(),
            info: DeviceInfo {
                name,
                model: None,
                firmware_version: None,
                user_count: None,
                record_count: None,
            },
        }
    }

    fn fail_or<T>(&self, value: T) -> DeviceResult<T> {
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(value),
        }
    }
}

#[async_trait]
impl DeviceConnector for InMemoryDeviceConnector {
    async fn connect(&mut self) -> DeviceResult<()> {
        self.fail_or(())?;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn ping(&mut self) -> DeviceResult<()> {
        if !self.connected {
            return Err(DeviceError::Unreachable(self.name.clone()));
        }
        self.fail_or(())
    }

    async fn get_users(&mut self) -> DeviceResult<Vec<User>> {
        self.fail_or(self.users.clone())
    }

    async fn get_attendance(&mut self) -> DeviceResult<Vec<AttendanceEvent>> {
        self.fail_or(self.events.clone())
    }

    async fn get_device_info(&mut self) -> DeviceResult<DeviceInfo> {
        self.fail_or(self.info.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PunchType;
    use chrono::Utc;

    fn user(id: &str) -> User {
        User {
            user_id: id.to_string(),
            name: format!("User {id}"),
            card_no: None,
            privilege: None,
            device_names: vec!["front-door".to_string()],
        }
    }

    #[tokio::test]
    async fn connects_and_returns_canned_data() {
        let mut connector = InMemoryDeviceConnector::new(
            "front-door",
            vec![user("u1")],
            vec![AttendanceEvent {
                user_id: "u1".to_string(),
                timestamp: Utc::now(),
                punch_type: PunchType::In,
                device_name: "front-door".to_string(),
            }],
        );
        connector.connect().await.unwrap();
        connector.ping().await.unwrap();
        assert_eq!(connector.get_users().await.unwrap().len(), 1);
        assert_eq!(connector.get_attendance().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ping_fails_when_never_connected() {
        let mut connector = InMemoryDeviceConnector::new("front-door", vec![], vec![]);
        let err = connector.ping().await.unwrap_err();
        assert!(matches!(err, DeviceError::Unreachable(_)));
    }

    #[tokio::test]
    async fn failing_connector_surfaces_configured_error() {
        let mut connector =
            InMemoryDeviceConnector::failing("back-door", DeviceError::Timeout("back-door".to_string()));
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, DeviceError::Timeout(_)));
    }
}
