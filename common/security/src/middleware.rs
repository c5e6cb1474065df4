use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use common_http_errors::ApiError;
use tracing::warn;
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::content_screen::ContentScreen;
use crate::headers::emit_response_headers;
use crate::ip_allow::{ip_allowed, resolve_caller_ip};
use crate::metrics::record_rejection;
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::request_id::RequestId;

/// Everything the gate needs, shared across requests. One `SecurityState`
/// per service, built from its `SecurityConfig` and swapped wholesale on
/// `/reload-config` (the config itself is cheap to clone; the limiter
/// keeps its per-IP state across a reload by design).
#[derive(Clone)]
pub struct SecurityState {
    pub service: &'static str,
    pub config: Arc<SecurityConfig>,
    pub rate_limiter: Arc<RateLimiter>,
    pub content_screen: Arc<ContentScreen>,
}

impl SecurityState {
    pub fn new(service: &'static str, config: SecurityConfig) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_window,
            config.rate_limit_capacity,
            config.rate_limit_block,
            config.rate_limit_block_ceiling,
        ));
        let content_screen = Arc::new(ContentScreen::new(
            config.max_body_bytes,
            config.content_blocklist.clone(),
        ));
        Self {
            service,
            config: Arc::new(config),
            rate_limiter,
            content_screen,
        }
    }
}

/// Runs the IP allow-list, rate limiting, and size/content screening
/// stages in order; authentication happens later at the handler via
/// `common_auth::Principal`. Always decorates the response with the
/// standard security headers on the way out, success or failure.
pub async fn security_gate(
    State(state): State<SecurityState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4();
    let path = request.uri().path().to_string();
    let ip = resolve_caller_ip(request.headers(), peer.ip(), state.config.trust_forwarded_for);

    let reject = |reason: &'static str, error: ApiError| -> Response {
        record_rejection(state.service, reason);
        warn!(%ip, reason, %request_id, path = %path, "security rejection");
        let mut response = error.into_response();
        emit_response_headers(response.headers_mut(), request_id);
        response
    };

    if !ip_allowed(&state.config.ip_allowlist, ip) {
        return reject(
            "ip_not_allowed",
            ApiError::Forbidden {
                request_id: Some(request_id),
            },
        );
    }

    if let RateDecision::Blocked { retry_after } = state.rate_limiter.check(ip) {
        return reject(
            "rate_limited",
            ApiError::RateLimited {
                request_id: Some(request_id),
                retry_after_secs: retry_after.as_secs(),
            },
        );
    }

    if let Err(message) = state.content_screen.check_path(&path) {
        return reject(
            "content_screen",
            ApiError::BadRequest {
                request_id: Some(request_id),
                code: "BAD_REQUEST",
                message,
            },
        );
    }

    if let Some(query) = request.uri().query() {
        if let Err(message) = state.content_screen.check_text(query) {
            return reject(
                "content_screen",
                ApiError::BadRequest {
                    request_id: Some(request_id),
                    code: "BAD_REQUEST",
                    message,
                },
            );
        }
    }

    let (mut parts, body) = request.into_parts();
    let limit = state.content_screen.max_body_bytes() + 1;
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return reject(
                "content_screen",
                ApiError::BadRequest {
                    request_id: Some(request_id),
                    code: "BAD_REQUEST",
                    message: format!("unreadable request body: {err}"),
                },
            )
        }
    };

    if let Err(message) = state.content_screen.check_body_len(bytes.len()) {
        return reject(
            "content_screen",
            ApiError::BadRequest {
                request_id: Some(request_id),
                code: "BAD_REQUEST",
                message,
            },
        );
    }
    if let Ok(text) = std::str::from_utf8(&bytes) {
        if let Err(message) = state.content_screen.check_text(text) {
            return reject(
                "content_screen",
                ApiError::BadRequest {
                    request_id: Some(request_id),
                    code: "BAD_REQUEST",
                    message,
                },
            );
        }
    }

    parts.extensions.insert(RequestId(request_id));
    let request = Request::from_parts(parts, Body::from(bytes));

    let mut response = next.run(request).await;
    emit_response_headers(response.headers_mut(), request_id);
    response
}
