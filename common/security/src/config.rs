use std::time::Duration;

use ipnetwork::IpNetwork;

/// Tunables for the shared security middleware. One `SecurityConfig` is
/// built at service start from the service's own configuration file and
/// swapped atomically on `/reload-config`.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// CIDR blocks allowed to call in. Empty means "allow everyone".
    pub ip_allowlist: Vec<IpNetwork>,
    /// Trust `X-Forwarded-For` for the caller IP (only when the request
    /// arrived through a known reverse proxy).
    pub trust_forwarded_for: bool,
    /// Sliding window width `W`.
    pub rate_limit_window: Duration,
    /// Requests allowed per IP per window, `N`.
    pub rate_limit_capacity: u32,
    /// Base block duration `B` once `N` is exceeded inside `W`.
    pub rate_limit_block: Duration,
    /// Ceiling on the exponential block back-off.
    pub rate_limit_block_ceiling: Duration,
    /// `MAX_BODY`: request bodies larger than this fail content screening.
    pub max_body_bytes: usize,
    /// Literal, case-insensitive substrings rejected in path/query/body.
    pub content_blocklist: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            ip_allowlist: Vec::new(),
            trust_forwarded_for: false,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_capacity: 120,
            rate_limit_block: Duration::from_secs(30),
            rate_limit_block_ceiling: Duration::from_secs(3600),
            max_body_bytes: 1_000_000,
            content_blocklist: Vec::new(),
        }
    }
}
