use std::net::SocketAddr;

use anyhow::Context;
use location_service::{build_router, AppState, LocationConfig};
use tokio::net::TcpListener;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = LocationConfig::from_env().context("loading location-service configuration")?;
    let port = config.port;
    let reaper_interval = config.reaper_interval;
    let state = AppState::new(config).context("building location-service state")?;

    spawn_idle_reaper(state.clone(), reaper_interval);
    spawn_rate_limit_sweep(state.clone());

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    info!(%addr, "location-service listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("serving location-service")?;
    Ok(())
}

/// Disconnects idle device sessions on a fixed interval.
fn spawn_idle_reaper(state: AppState, interval_duration: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            state.device_pool.read().await.reap_idle().await;
        }
    });
}

/// Sweeps expired, unblocked rate-limiter entries so the map does not grow
/// without bound.
fn spawn_rate_limit_sweep(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = interval(std::time::Duration::from_secs(60));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let remaining = state.security_sweep().await;
            warn!(remaining, "rate limiter sweep completed");
        }
    });
}
