use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One registered Location Service. Owned by the Gateway's configuration:
/// created at start, mutated only via `/reload-config`, never destroyed
/// mid-request.
#[derive(Debug, Clone, Serialize)]
pub struct Location {
    pub id: String,
    pub display_name: String,
    pub address: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub device_names: Vec<String>,
    pub enabled: bool,
    pub timeout: Duration,
    pub priority: i32,
}

/// One entry of the location registry JSON file: location-id maps to
/// `{url, api_key, timeout, enabled, priority, devices}`.
#[derive(Debug, Deserialize)]
struct LocationEntry {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    address: Option<String>,
    url: String,
    api_key: String,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    devices: Vec<String>,
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_enabled() -> bool {
    true
}

const MIN_API_KEY_LEN: usize = 32;
const MIN_TIMEOUT_SECONDS: u64 = 1;
const MAX_TIMEOUT_SECONDS: u64 = 120;

/// The Gateway's view of the whole fleet: every registered Location, plus
/// the device-name -> owning-Location index `/device/{name}/*` resolves
/// against. Duplicate device names across Locations are reported with a
/// warning but not rejected at load time.
#[derive(Debug, Clone, Default)]
pub struct LocationRegistry {
    locations: HashMap<String, Location>,
    device_owners: HashMap<String, Vec<String>>,
}

/// Resolving a device name to its owning Location. An ambiguous resolution
/// (the same device name registered under more than one Location) is
/// reported to the caller as a conflict rather than picked arbitrarily.
pub enum DeviceResolution<'a> {
    NotFound,
    Unique(&'a Location),
    Ambiguous(Vec<String>),
}

impl LocationRegistry {
    pub fn from_map(entries: HashMap<String, LocationEntry>) -> Result<Self> {
        let mut locations = HashMap::with_capacity(entries.len());
        let mut device_owners: HashMap<String, Vec<String>> = HashMap::new();

        for (id, entry) in entries {
            validate_entry(&id, &entry)?;
            for device in &entry.devices {
                device_owners.entry(device.clone()).or_default().push(id.clone());
            }
            locations.insert(
                id.clone(),
                Location {
                    id: id.clone(),
                    display_name: entry.display_name.unwrap_or_else(|| id.clone()),
                    address: entry.address.unwrap_or_default(),
                    url: entry.url,
                    api_key: entry.api_key,
                    device_names: entry.devices,
                    enabled: entry.enabled,
                    timeout: Duration::from_secs(entry.timeout_seconds),
                    priority: entry.priority,
                },
            );
        }

        for (device, owners) in &device_owners {
            if owners.len() > 1 {
                warn!(device, owners = ?owners, "device name registered under multiple Locations; /device/{{name}}/* will reject with CONFLICT");
            }
        }

        Ok(Self {
            locations,
            device_owners,
        })
    }

    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading location registry at {path}"))?;
        let entries: HashMap<String, LocationEntry> =
            serde_json::from_str(&raw).with_context(|| format!("parsing location registry at {path}"))?;
        Self::from_map(entries)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Location> {
        self.locations.get(id)
    }

    pub fn enabled(&self) -> Vec<&Location> {
        let mut out: Vec<&Location> = self.locations.values().filter(|l| l.enabled).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn all(&self) -> Vec<&Location> {
        let mut out: Vec<&Location> = self.locations.values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Resolve a device name to its unique owning Location.
    pub fn resolve_device(&self, device: &str) -> DeviceResolution<'_> {
        match self.device_owners.get(device) {
            None => DeviceResolution::NotFound,
            Some(owners) if owners.len() == 1 => match self.locations.get(&owners[0]) {
                Some(location) => DeviceResolution::Unique(location),
                None => DeviceResolution::NotFound,
            },
            Some(owners) => DeviceResolution::Ambiguous(owners.clone()),
        }
    }
}

fn validate_entry(id: &str, entry: &LocationEntry) -> Result<()> {
    if !(entry.url.starts_with("http://") || entry.url.starts_with("https://")) {
        bail!("location '{id}': url must be http(s), got '{}'", entry.url);
    }
    if entry.api_key.len() < MIN_API_KEY_LEN {
        bail!("location '{id}': api_key must be at least {MIN_API_KEY_LEN} chars");
    }
    if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&entry.timeout_seconds) {
        bail!(
            "location '{id}': timeout_seconds must be in [{MIN_TIMEOUT_SECONDS}, {MAX_TIMEOUT_SECONDS}], got {}",
            entry.timeout_seconds
        );
    }
    // A Location never appears enabled with an empty registered api_key.
    if entry.enabled && entry.api_key.trim().is_empty() {
        bail!("location '{id}': enabled Location must have a non-empty api_key");
    }
    Ok(())
}
