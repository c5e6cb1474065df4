pub mod config;
pub mod content_screen;
pub mod headers;
pub mod ip_allow;
pub mod metrics;
pub mod middleware;
pub mod rate_limit;
pub mod request_id;

pub use config::SecurityConfig;
pub use content_screen::ContentScreen;
pub use headers::emit_response_headers;
pub use ip_allow::{ip_allowed, resolve_caller_ip};
pub use metrics::record_rejection;
pub use middleware::{security_gate, SecurityState};
pub use rate_limit::{RateDecision, RateLimiter};
pub use request_id::RequestId;
