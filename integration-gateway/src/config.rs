use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use common_security::SecurityConfig;
use ipnetwork::IpNetwork;

use crate::locations::LocationRegistry;

const MIN_API_KEY_LEN: usize = 32;

/// Runtime configuration for the Unified Gateway: the Location registry,
/// the auth material it issues its own JWTs with, security tunables, and
/// the fan-out concurrency/circuit-breaker knobs.
pub struct GatewayConfig {
    pub service_port: u16,
    pub frontend_api_key: String,
    pub place_backend_api_key: String,
    pub jwt_secret: Vec<u8>,
    pub locations: LocationRegistry,
    pub security: SecurityConfig,
    pub fan_out_deadline: Duration,
    pub fan_out_concurrency: usize,
    pub circuit_failure_threshold: u32,
    pub circuit_base_open: Duration,
    pub circuit_open_ceiling: Duration,
    pub location_reload_interval: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let service_port = env::var("SERVICE_PORT").ok().and_then(|v| v.parse::<u16>().ok()).unwrap_or(8090);

        let frontend_api_key = env::var("GATEWAY_FRONTEND_API_KEY").context("GATEWAY_FRONTEND_API_KEY must be set")?;
        if frontend_api_key.len() < MIN_API_KEY_LEN {
            bail!("GATEWAY_FRONTEND_API_KEY must be at least {MIN_API_KEY_LEN} bytes");
        }
        let place_backend_api_key =
            env::var("GATEWAY_PLACE_API_KEY").context("GATEWAY_PLACE_API_KEY must be set")?;
        if place_backend_api_key.len() < MIN_API_KEY_LEN {
            bail!("GATEWAY_PLACE_API_KEY must be at least {MIN_API_KEY_LEN} bytes");
        }
        let jwt_secret = env::var("GATEWAY_JWT_SECRET").context("GATEWAY_JWT_SECRET must be set")?.into_bytes();

        let locations = match env::var("LOCATION_REGISTRY_PATH") {
            Ok(path) => LocationRegistry::load(&path)?,
            Err(_) => LocationRegistry::empty(),
        };

        let security = security_config_from_env();

        let fan_out_deadline = Duration::from_millis(
            env::var("FAN_OUT_DEADLINE_MS").ok().and_then(|v| v.parse::<u64>().ok()).unwrap_or(8_000),
        );
        let fan_out_concurrency =
            env::var("FAN_OUT_CONCURRENCY").ok().and_then(|v| v.parse::<usize>().ok()).unwrap_or(16);

        let circuit_failure_threshold =
            env::var("CIRCUIT_FAILURE_THRESHOLD").ok().and_then(|v| v.parse::<u32>().ok()).unwrap_or(5);
        let circuit_base_open = Duration::from_secs(
            env::var("CIRCUIT_BASE_OPEN_SECONDS").ok().and_then(|v| v.parse::<u64>().ok()).unwrap_or(10),
        );
        let circuit_open_ceiling = Duration::from_secs(
            env::var("CIRCUIT_OPEN_CEILING_SECONDS").ok().and_then(|v| v.parse::<u64>().ok()).unwrap_or(300),
        );

        let location_reload_interval = Duration::from_secs(
            env::var("LOCATION_RELOAD_SWEEP_SECONDS").ok().and_then(|v| v.parse::<u64>().ok()).unwrap_or(60),
        );

        Ok(Self {
            service_port,
            frontend_api_key,
            place_backend_api_key,
            jwt_secret,
            locations,
            security,
            fan_out_deadline,
            fan_out_concurrency,
            circuit_failure_threshold,
            circuit_base_open,
            circuit_open_ceiling,
            location_reload_interval,
        })
    }
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
