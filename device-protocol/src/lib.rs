pub mod connector;
pub mod error;
pub mod fake;
pub mod tcp;
pub mod types;

pub use connector::DeviceConnector;
pub use error::{DeviceError, DeviceResult};
pub use types::{AttendanceEvent, Device, DeviceInfo, PunchType, User};
