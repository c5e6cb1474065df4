use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use device_protocol::{AttendanceEvent, Device, DeviceError, DeviceInfo, DeviceResult, User};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::DeviceEntry;

/// Builds a fresh connector for one configured device. Production wiring
/// supplies one backed by `device_protocol::tcp::TcpDeviceConnector`; tests
/// supply one backed by `device_protocol::fake::InMemoryDeviceConnector`.
pub type ConnectorFactory =
    Arc<dyn Fn(&str, &DeviceEntry) -> Box<dyn device_protocol::DeviceConnector> + Send + Sync>;

/// Observed reachability for one device: `Unknown -> Reachable <->
/// Unreachable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Unknown,
    Reachable,
    Unreachable,
}

struct Slot {
    connector: Box<dyn device_protocol::DeviceConnector>,
    connected: bool,
    state: DeviceState,
    last_used: Instant,
}

/// Owns one mutex per configured device so operations against the same
/// device serialize (devices reject concurrent sessions) while different
/// devices proceed in parallel.
pub struct DevicePool {
    devices: HashMap<String, DeviceEntry>,
    slots: HashMap<String, Mutex<Slot>>,
    factory: ConnectorFactory,
    op_timeout: Duration,
    idle_ttl: Duration,
}

impl DevicePool {
    pub fn new(devices: HashMap<String, DeviceEntry>, factory: ConnectorFactory, op_timeout: Duration, idle_ttl: Duration) -> Self {
        let slots = devices
            .iter()
            .map(|(name, entry)| {
                let slot = Slot {
                    connector: factory(name, entry),
                    connected: false,
                    state: DeviceState::Unknown,
                    last_used: Instant::now(),
                };
                (name.clone(), Mutex::new(slot))
            })
            .collect();
        Self {
            devices,
            slots,
            factory,
            op_timeout,
            idle_ttl,
        }
    }

    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn device_entry(&self, name: &str) -> Option<&DeviceEntry> {
        self.devices.get(name)
    }

    pub fn devices(&self) -> Vec<Device> {
        let mut out: Vec<Device> = self
            .devices
            .iter()
            .map(|(name, entry)| Device {
                name: name.clone(),
                ip: entry.ip.clone(),
                port: entry.port,
                password: entry.password,
                model: None,
                capacity: None,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Whether a device was reachable the last time anything talked to it.
    /// No background probing beyond what `/health` triggers synchronously.
    pub async fn reachable(&self, name: &str) -> bool {
        match self.slots.get(name) {
            Some(slot) => slot.lock().await.state == DeviceState::Reachable,
            None => false,
        }
    }

    async fn ensure_connected(&self, slot: &mut Slot) -> DeviceResult<()> {
        if slot.connected {
            if slot.connector.ping().await.is_ok() {
                return Ok(());
            }
            slot.connector.disconnect().await;
            slot.connected = false;
        }
        slot.connector.connect().await?;
        slot.connected = true;
        Ok(())
    }

    async fn run<T, F, Fut>(&self, name: &str, op: F) -> DeviceResult<T>
    where
        F: FnOnce(&mut Box<dyn device_protocol::DeviceConnector>) -> Fut,
        Fut: std::future::Future<Output = DeviceResult<T>>,
    {
        let Some(mutex) = self.slots.get(name) else {
            return Err(DeviceError::Unreachable(name.to_string()));
        };
        let mut slot = mutex.lock().await;

        let result = async {
            self.ensure_connected(&mut slot).await?;
            timeout(self.op_timeout, op(&mut slot.connector))
                .await
                .map_err(|_| DeviceError::Timeout(name.to_string()))?
        }
        .await;

        slot.last_used = Instant::now();
        match &result {
            Ok(_) => {
                slot.state = DeviceState::Reachable;
            }
            Err(err) => {
                slot.state = DeviceState::Unreachable;
                slot.connector.disconnect().await;
                slot.connected = false;
                debug!(device = name, error = %err, "device operation failed");
            }
        }
        result
    }

    pub async fn get_users(&self, name: &str) -> DeviceResult<Vec<User>> {
        self.run(name, |c| c.get_users()).await
    }

    pub async fn get_attendance(&self, name: &str) -> DeviceResult<Vec<AttendanceEvent>> {
        self.run(name, |c| c.get_attendance()).await
    }

    pub async fn get_device_info(&self, name: &str) -> DeviceResult<DeviceInfo> {
        self.run(name, |c| c.get_device_info()).await
    }

    /// Probe reachability for `/health`: a cheap ping, not a full query.
    pub async fn probe(&self, name: &str) -> bool {
        self.run(name, |c| c.ping()).await.is_ok()
    }

    /// Disconnects sessions idle past `IDLE_TTL`. Run on a fixed interval
    /// from `main`.
    pub async fn reap_idle(&self) {
        let now = Instant::now();
        for (name, mutex) in &self.slots {
            let mut slot = mutex.lock().await;
            if slot.connected && now.duration_since(slot.last_used) >= self.idle_ttl {
                slot.connector.disconnect().await;
                slot.connected = false;
                debug!(device = name, "idle device session reaped");
            }
        }
    }

    /// Rebuild connectors from a reloaded device registry. Devices removed
    /// from config are dropped; new ones start `Unknown`.
    pub fn reload(&mut self, devices: HashMap<String, DeviceEntry>) {
        let mut slots = HashMap::with_capacity(devices.len());
        for (name, entry) in &devices {
            let slot = Slot {
                connector: (self.factory)(name, entry),
                connected: false,
                state: DeviceState::Unknown,
                last_used: Instant::now(),
            };
            slots.insert(name.clone(), Mutex::new(slot));
        }
        self.devices = devices;
        self.slots = slots;
        warn!(count = self.devices.len(), "device registry reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_protocol::fake::InMemoryDeviceConnector;

    fn entry() -> DeviceEntry {
        DeviceEntry {
            ip: "127.0.0.1".to_string(),
            port: 4370,
            password: 0,
        }
    }

    fn pool_with(name: &str, connector: InMemoryDeviceConnector) -> DevicePool {
        let mut devices = HashMap::new();
        devices.insert(name.to_string(), entry());
        let connector = Mutex::new(Some(connector));
        let factory: ConnectorFactory = Arc::new(move |_, _| {
            Box::new(connector.try_lock().unwrap().take().expect("factory called once in this test"))
        });
        DevicePool::new(devices, factory, Duration::from_secs(1), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn reachable_after_successful_call() {
        let pool = pool_with("front-door", InMemoryDeviceConnector::new("front-door", vec![], vec![]));
        assert!(!pool.reachable("front-door").await);
        pool.get_users("front-door").await.unwrap();
        assert!(pool.reachable("front-door").await);
    }

    #[tokio::test]
    async fn unreachable_device_surfaces_typed_error() {
        let pool = pool_with(
            "back-door",
            InMemoryDeviceConnector::failing("back-door", DeviceError::Unreachable("back-door".to_string())),
        );
        let err = pool.get_users("back-door").await.unwrap_err();
        assert!(matches!(err, DeviceError::Unreachable(_)));
        assert!(!pool.reachable("back-door").await);
    }

    #[tokio::test]
    async fn unknown_device_name_is_unreachable() {
        let pool = pool_with("front-door", InMemoryDeviceConnector::new("front-door", vec![], vec![]));
        let err = pool.get_users("side-door").await.unwrap_err();
        assert!(matches!(err, DeviceError::Unreachable(_)));
    }
}
