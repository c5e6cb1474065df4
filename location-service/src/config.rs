use std::collections::{BTreeSet, HashMap};
use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime, Weekday};
use common_security::SecurityConfig;
use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::model::AttendancePolicy;

/// One line of the device registry JSON file: maps a device name to its
/// connection details.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub ip: String,
    pub port: u16,
    pub password: i64,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyFile {
    #[serde(default)]
    weekend_days: Vec<String>,
    #[serde(default)]
    holidays: Vec<NaiveDate>,
    work_start: Option<String>,
    work_end: Option<String>,
    grace_minutes: Option<i64>,
}

fn parse_weekday(value: &str) -> Result<Weekday> {
    value
        .parse::<Weekday>()
        .with_context(|| format!("invalid weekend day '{value}'"))
}

/// Runtime configuration for the Location Service: the device registry, the
/// attendance policy, security tunables, and JWT/API-key material.
pub struct LocationConfig {
    pub service_id: String,
    pub port: u16,
    pub api_key: String,
    pub jwt_secret: Vec<u8>,
    pub devices: HashMap<String, DeviceEntry>,
    pub policy: AttendancePolicy,
    pub security: SecurityConfig,
    pub device_op_timeout: Duration,
    pub idle_ttl: Duration,
    pub reaper_interval: Duration,
}

const MIN_API_KEY_LEN: usize = 32;

impl LocationConfig {
    pub fn from_env() -> Result<Self> {
        let service_id = env::var("LOCATION_SERVICE_ID").unwrap_or_else(|_| "location-service".to_string());
        let port = env::var("SERVICE_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8080);
        let api_key = env::var("LOCATION_API_KEY").context("LOCATION_API_KEY must be set")?;
        if api_key.len() < MIN_API_KEY_LEN {
            bail!("LOCATION_API_KEY must be at least {MIN_API_KEY_LEN} bytes");
        }
        let jwt_secret = env::var("LOCATION_JWT_SECRET").context("LOCATION_JWT_SECRET must be set")?.into_bytes();

        let devices = match env::var("DEVICE_REGISTRY_PATH") {
            Ok(path) => load_devices(&path)?,
            Err(_) => HashMap::new(),
        };
        for (name, entry) in &devices {
            if entry.port == 0 {
                bail!("device '{name}' has an invalid port");
            }
        }

        let policy = match env::var("ATTENDANCE_POLICY_PATH") {
            Ok(path) => load_policy(&path)?,
            Err(_) => AttendancePolicy::default(),
        };

        let security = security_config_from_env();

        let device_op_timeout = Duration::from_millis(
            env::var("DEVICE_OP_TIMEOUT_MS").ok().and_then(|v| v.parse::<u64>().ok()).unwrap_or(5_000),
        );
        let idle_ttl = Duration::from_secs(
            env::var("DEVICE_IDLE_TTL_SECONDS").ok().and_then(|v| v.parse::<u64>().ok()).unwrap_or(300),
        );
        let reaper_interval = Duration::from_secs(
            env::var("DEVICE_REAPER_INTERVAL_SECONDS").ok().and_then(|v| v.parse::<u64>().ok()).unwrap_or(30),
        );

        Ok(Self {
            service_id,
            port,
            api_key,
            jwt_secret,
            devices,
            policy,
            security,
            device_op_timeout,
            idle_ttl,
            reaper_interval,
        })
    }
}

fn load_devices(path: &str) -> Result<HashMap<String, DeviceEntry>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading device registry at {path}"))?;
    let devices: HashMap<String, DeviceEntry> =
        serde_json::from_str(&raw).with_context(|| format!("parsing device registry at {path}"))?;
    Ok(devices)
}

fn load_policy(path: &str) -> Result<AttendancePolicy> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading policy file at {path}"))?;
    let file: PolicyFile = serde_json::from_str(&raw).with_context(|| format!("parsing policy file at {path}"))?;
    let mut policy = AttendancePolicy::default();
    if !file.weekend_days.is_empty() {
        let mut days = BTreeSet::new();
        for raw_day in &file.weekend_days {
            days.insert(parse_weekday(raw_day)?);
        }
        policy.weekend_days = days;
    }
    policy.holidays = file.holidays.into_iter().collect();
    if let Some(start) = file.work_start {
        policy.work_start = NaiveTime::parse_from_str(&start, "%H:%M").context("invalid work_start")?;
    }
    if let Some(end) = file.work_end {
        policy.work_end = NaiveTime::parse_from_str(&end, "%H:%M").context("invalid work_end")?;
    }
    if let Some(grace) = file.grace_minutes {
        policy.grace_minutes = grace;
    }
    Ok(policy)
}

fn security_config_from_env() -> SecurityConfig {
    let mut config = SecurityConfig::default();
    if let Ok(cidrs) = env::var("IP_ALLOWLIST") {
        config.ip_allowlist = cidrs
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| s.trim().parse::<IpNetwork>().ok())
            .collect();
    }
    config.trust_forwarded_for = env::var("TRUST_FORWARDED_FOR").map(|v| v == "true").unwrap_or(false);
    if let Ok(value) = env::var("RATE_LIMIT_WINDOW_SECONDS") {
        if let Ok(secs) = value.parse::<u64>() {
            config.rate_limit_window = Duration::from_secs(secs);
        }
    }
    if let Ok(value) = env::var("RATE_LIMIT_CAPACITY") {
        if let Ok(n) = value.parse::<u32>() {
            config.rate_limit_capacity = n;
        }
    }
    if let Ok(value) = env::var("RATE_LIMIT_BLOCK_SECONDS") {
        if let Ok(secs) = value.parse::<u64>() {
            config.rate_limit_block = Duration::from_secs(secs);
        }
    }
    if let Ok(value) = env::var("RATE_LIMIT_BLOCK_CEILING_SECONDS") {
        if let Ok(secs) = value.parse::<u64>() {
            config.rate_limit_block_ceiling = Duration::from_secs(secs);
        }
    }
    if let Ok(value) = env::var("MAX_BODY_BYTES") {
        if let Ok(n) = value.parse::<usize>() {
            config.max_body_bytes = n;
        }
    }
    if let Ok(patterns) = env::var("CONTENT_BLOCKLIST") {
        config.content_blocklist = patterns.split(',').filter(|s| !s.trim().is_empty()).map(|s| s.trim().to_string()).collect();
    }
    config
}
