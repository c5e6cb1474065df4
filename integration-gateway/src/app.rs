use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::FromRef;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use common_auth::{ApiKeyRegistry, JwtCodec, JwtConfig, PrincipalKind};
use common_http_errors::http_error_metrics_layer;
use common_observability::GatewayMetrics;
use common_security::{security_gate, SecurityState};
use tokio::sync::RwLock;

use crate::config::GatewayConfig;
use crate::downstream::DownstreamClient;
use crate::locations::LocationRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub jwt: Arc<JwtCodec>,
    pub api_keys: Arc<ApiKeyRegistry>,
    pub locations: Arc<RwLock<LocationRegistry>>,
    pub downstream: Arc<DownstreamClient>,
    pub metrics: Arc<GatewayMetrics>,
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
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let jwt_config = JwtConfig::new("unified-gateway", config.jwt_secret.clone())?;
        let jwt = Arc::new(JwtCodec::new(jwt_config));
        let api_keys = Arc::new(ApiKeyRegistry::new([
            (config.frontend_api_key.clone(), PrincipalKind::Frontend),
            (config.place_backend_api_key.clone(), PrincipalKind::PlaceBackend),
        ]));

        let metrics = Arc::new(GatewayMetrics::default());
        let downstream = Arc::new(DownstreamClient::new(
            metrics.clone(),
            config.circuit_failure_threshold,
            config.circuit_base_open,
            config.circuit_open_ceiling,
        ));
        let locations = Arc::new(RwLock::new(config.locations.clone()));
        let security = SecurityState::new("unified-gateway", config.security.clone());

        Ok(Self {
            config: Arc::new(config),
            jwt,
            api_keys,
            locations,
            downstream,
            metrics,
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

    /// Reload the Location registry from disk. Held behind the registry's
    /// own write lock so in-flight fan-out rounds observe either the old
    /// or the new registry, never a torn mix.
    pub async fn reload_locations(&self) -> Result<usize> {
        let Some(path) = std::env::var("LOCATION_REGISTRY_PATH").ok() else {
            return Ok(self.locations.read().await.len());
        };
        let registry = LocationRegistry::load(&path)?;
        let count = registry.len();
        *self.locations.write().await = registry;
        Ok(count)
    }
}

pub fn build_router(state: AppState) -> Router {
    let security = state.security.clone();

    Router::new()
        .route("/auth/frontend/token", post(crate::handlers::issue_frontend_token))
        .route("/auth/place/token", post(crate::handlers::issue_place_token))
        .route("/health", get(crate::handlers::health))
        .route("/places", get(crate::handlers::list_places))
        .route("/devices/all", get(crate::handlers::list_all_devices))
        .route("/users/all", get(crate::handlers::list_all_users))
        .route("/attendance/all", get(crate::handlers::attendance_all))
        .route("/summary/all", get(crate::handlers::summary_all))
        .route("/place/:id/*path", get(crate::handlers::proxy_place))
        .route("/device/:name/*path", get(crate::handlers::proxy_device))
        .route("/reload-config", post(crate::handlers::reload_config))
        .route("/metrics", get(crate::handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn_with_state(security, security_gate))
        .layer(middleware::from_fn(http_error_metrics_layer("unified-gateway")))
}
