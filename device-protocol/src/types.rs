use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured fingerprint device. `password` is the device's own
/// access code over the wire protocol, never the same thing as a service
/// API key, and is stripped before a `Device` is ever serialized back to
/// a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub ip: String,
    pub port: u16,
    #[serde(skip_serializing, default)]
    pub password: i64,
    pub model: Option<String>,
    pub capacity: Option<u32>,
}

/// A person enrolled on one or more devices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub card_no: Option<String>,
    pub privilege: Option<String>,
    pub device_names: Vec<String>,
}

/// Raw punch classification as reported by the device itself; `Unknown`
/// covers devices that don't distinguish in/out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunchType {
    In,
    Out,
    Other,
    Unknown,
}

/// A single raw punch read from a device. `timestamp` is the device's own
/// local clock reading, not normalized to UTC here - enrichment buckets by
/// local date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub punch_type: PunchType,
    pub device_name: String,
}

/// Vendor-reported device identity, returned by `get_device_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub user_count: Option<u32>,
    pub record_count: Option<u32>,
}
