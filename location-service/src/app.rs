use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::FromRef;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use common_auth::{ApiKeyRegistry, JwtCodec, JwtConfig, PrincipalKind};
use common_http_errors::http_error_metrics_layer;
use common_observability::LocationMetrics;
use common_security::{security_gate, SecurityState};
use device_protocol::tcp::{TcpDeviceConnector, TcpTimeouts};
use tokio::sync::RwLock;

use crate::config::LocationConfig;
use crate::device_pool::{ConnectorFactory, DevicePool};
use crate::model::AttendancePolicy;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<LocationConfig>,
    pub jwt: Arc<JwtCodec>,
    pub api_keys: Arc<ApiKeyRegistry>,
    pub device_pool: Arc<RwLock<DevicePool>>,
    pub policy: Arc<RwLock<AttendancePolicy>>,
    pub metrics: Arc<LocationMetrics>,
    pub security: SecurityState,
    pub started_at: Instant,
}

impl FromRef<AppState> for Arc<JwtCodec> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl FromRef<AppState> for Arc<ApiKeyRegistry> {
    fn from_ref(state: &AppState) -> Self {
        state.api_keys.clone()
    }
}

impl AppState {
    pub fn new(config: LocationConfig) -> Result<Self> {
        let jwt_config = JwtConfig::new(config.service_id.clone(), config.jwt_secret.clone())?;
        let jwt = Arc::new(JwtCodec::new(jwt_config));
        let api_keys = Arc::new(ApiKeyRegistry::single(config.api_key.clone(), PrincipalKind::PlaceBackend));

        let factory: ConnectorFactory = Arc::new(|name, entry| {
            Box::new(TcpDeviceConnector::new(name, entry.ip.clone(), entry.port, TcpTimeouts::default()))
        });
        let device_pool = Arc::new(RwLock::new(DevicePool::new(
            config.devices.clone(),
            factory,
            config.device_op_timeout,
            config.idle_ttl,
        )));
        let policy = Arc::new(RwLock::new(config.policy.clone()));
        let security = SecurityState::new("location-service", config.security.clone());

        Ok(Self {
            config: Arc::new(config),
            jwt,
            api_keys,
            device_pool,
            policy,
            metrics: Arc::new(LocationMetrics::default()),
            security,
            started_at: Instant::now(),
        })
    }

    /// Sweeps expired, unblocked rate-limiter entries. Returns the number
    /// of entries tracked after the sweep, for logging.
    pub async fn security_sweep(&self) -> usize {
        self.security.rate_limiter.sweep();
        self.security.rate_limiter.entry_count()
    }

    /// Reload the device registry from disk, leaving the policy and
    /// security config untouched. Held behind the pool's own write lock so
    /// in-flight requests observe either the old or the new registry, never
    /// a torn mix.
    pub async fn reload_devices(&self) -> Result<usize> {
        let Some(path) = std::env::var("DEVICE_REGISTRY_PATH").ok() else {
            return Ok(self.device_pool.read().await.device_names().len());
        };
        let raw = std::fs::read_to_string(&path)?;
        let devices: std::collections::HashMap<String, crate::config::DeviceEntry> = serde_json::from_str(&raw)?;
        let count = devices.len();
        self.device_pool.write().await.reload(devices);
        Ok(count)
    }
}

pub fn build_router(state: AppState) -> Router {
    let security = state.security.clone();

    Router::new()
        .route("/auth/token", post(crate::handlers::issue_token))
        .route("/health", get(crate::handlers::health))
        .route("/devices", get(crate::handlers::list_devices))
        .route("/users", get(crate::handlers::list_users))
        .route("/attendance", get(crate::handlers::attendance))
        .route("/attendance/summary", get(crate::handlers::attendance_summary))
        .route("/reload-config", post(crate::handlers::reload_config))
        .route("/metrics", get(crate::handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn_with_state(security, security_gate))
        .layer(middleware::from_fn(http_error_metrics_layer("location-service")))
}
