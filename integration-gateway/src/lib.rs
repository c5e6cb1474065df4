pub mod app;
pub mod circuit_breaker;
pub mod config;
pub mod downstream;
pub mod handlers;
pub mod locations;
pub mod model;
pub mod token_cache;

pub use app::{build_router, AppState};
pub use config::GatewayConfig;
