use std::net::IpAddr;

use axum::http::HeaderMap;
use ipnetwork::IpNetwork;

/// Resolve the caller's IP: the first non-proxy address in
/// `X-Forwarded-For` when the request arrived through a trusted proxy,
/// else the socket peer.
pub fn resolve_caller_ip(headers: &HeaderMap, peer: IpAddr, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }
    peer
}

/// An empty allow-list passes every IP; otherwise the IP must fall inside
/// at least one configured CIDR block.
pub fn ip_allowed(allowlist: &[IpNetwork], ip: IpAddr) -> bool {
    allowlist.is_empty() || allowlist.iter().any(|net| net.contains(ip))
}
