use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use integration_gateway::{build_router, AppState, GatewayConfig};
use tokio::net::TcpListener;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = GatewayConfig::from_env().context("loading unified-gateway configuration")?;
    let port = config.service_port;
    let reload_interval = config.location_reload_interval;
    let state = AppState::new(config).context("building unified-gateway state")?;

    spawn_rate_limit_sweep(state.clone());
    spawn_location_reload(state.clone(), reload_interval);

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    info!(%addr, "unified-gateway listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("serving unified-gateway")?;
    Ok(())
}

fn spawn_rate_limit_sweep(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(60));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let remaining = state.security_sweep().await;
            warn!(remaining, "rate limiter sweep completed");
        }
    });
}

/// Periodically re-reads the Location registry from disk so a Location
/// can be added, removed, or re-pointed without restarting the gateway.
fn spawn_location_reload(state: AppState, reload_interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(reload_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match state.reload_locations().await {
                Ok(count) => info!(count, "location registry reloaded"),
                Err(err) => warn!(%err, "location registry reload failed"),
            }
        }
    });
}
