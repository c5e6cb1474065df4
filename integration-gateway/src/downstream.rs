use std::time::{Duration, Instant};

use bytes::Bytes;
use common_http_errors::Envelope;
use common_observability::GatewayMetrics;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::circuit_breaker::{Admission, CircuitBreakers};
use crate::locations::Location;
use crate::token_cache::TokenCache;

/// Why one Location's leg of a fan-out call failed: a transport-level
/// problem, an auth rejection, a blown deadline, an HTTP error status, a
/// response that doesn't parse, or the circuit breaker refusing the call
/// outright.
#[derive(Debug, Clone)]
pub enum DownstreamFailure {
    CircuitOpen,
    AuthFailure,
    Timeout,
    Transport(String),
    Http(u16),
    Malformed(String),
}

impl DownstreamFailure {
    /// Stable reason string used in `metadata.failures[].reason` and as the
    /// `gateway_fan_out_results_total` metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            DownstreamFailure::CircuitOpen => "circuit_open",
            DownstreamFailure::AuthFailure => "auth_failure",
            DownstreamFailure::Timeout => "timeout",
            DownstreamFailure::Transport(_) => "transport_error",
            DownstreamFailure::Http(_) => "http_error",
            DownstreamFailure::Malformed(_) => "malformed_response",
        }
    }
}

impl std::fmt::Display for DownstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownstreamFailure::Http(code) => write!(f, "http {code}"),
            DownstreamFailure::Transport(msg) | DownstreamFailure::Malformed(msg) => write!(f, "{}: {msg}", self.reason()),
            _ => write!(f, "{}", self.reason()),
        }
    }
}

#[derive(Deserialize)]
struct TokenData {
    access_token: String,
    expires_in: i64,
}

enum RawOutcome {
    Success(Bytes),
    Unauthorized,
    Http(u16),
}

/// Mints/caches Location JWTs, enforces the per-Location circuit breaker,
/// and issues the actual HTTP calls a fan-out round fires off.
pub struct DownstreamClient {
    http: reqwest::Client,
    token_cache: TokenCache,
    breakers: CircuitBreakers,
    metrics: std::sync::Arc<GatewayMetrics>,
}

impl DownstreamClient {
    pub fn new(
        metrics: std::sync::Arc<GatewayMetrics>,
        failure_threshold: u32,
        base_open: Duration,
        open_ceiling: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_cache: TokenCache::new(),
            breakers: CircuitBreakers::new(failure_threshold, base_open, open_ceiling),
            metrics,
        }
    }

    pub fn breaker_state(&self, location_id: &str) -> crate::circuit_breaker::BreakerState {
        self.breakers.state_of(location_id)
    }

    fn on_success(&self, location_id: &str) {
        if let Some(transition) = self.breakers.record_success(location_id) {
            self.metrics.record_circuit_breaker_transition(location_id, transition);
        }
        self.metrics.record_fan_out_result(location_id, "success");
    }

    fn on_failure(&self, location_id: &str, failure: &DownstreamFailure) {
        if matches!(failure, DownstreamFailure::CircuitOpen) {
            self.metrics.record_fan_out_result(location_id, failure.reason());
            return;
        }
        if let Some(transition) = self.breakers.record_failure(location_id) {
            self.metrics.record_circuit_breaker_transition(location_id, transition);
        }
        self.metrics.record_fan_out_result(location_id, failure.reason());
    }

    async fn mint_token(&self, location: &Location, per_call_timeout: Duration) -> Result<String, DownstreamFailure> {
        let url = format!("{}/auth/token", location.url.trim_end_matches('/'));
        let body = serde_json::json!({ "api_key": location.api_key });
        let send = self.http.post(&url).json(&body).send();
        let response = match tokio::time::timeout(per_call_timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(DownstreamFailure::Transport(err.to_string())),
            Err(_) => return Err(DownstreamFailure::Timeout),
        };
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(DownstreamFailure::AuthFailure);
        }
        if !response.status().is_success() {
            return Err(DownstreamFailure::Http(response.status().as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| DownstreamFailure::Transport(err.to_string()))?;
        let envelope: Envelope<TokenData> =
            serde_json::from_slice(&bytes).map_err(|err| DownstreamFailure::Malformed(err.to_string()))?;
        let data = envelope
            .data
            .ok_or_else(|| DownstreamFailure::Malformed("token response missing data".to_string()))?;
        self.token_cache.store(&location.id, data.access_token.clone(), Duration::from_secs(data.expires_in.max(0) as u64));
        Ok(data.access_token)
    }

    async fn ensure_token(&self, location: &Location, per_call_timeout: Duration) -> Result<String, DownstreamFailure> {
        if let Some(token) = self.token_cache.get(&location.id) {
            return Ok(token);
        }
        self.mint_token(location, per_call_timeout).await
    }

    async fn call_with_token(
        &self,
        location: &Location,
        method: Method,
        path: &str,
        token: &str,
        per_call_timeout: Duration,
    ) -> Result<RawOutcome, DownstreamFailure> {
        let url = format!("{}{}", location.url.trim_end_matches('/'), path);
        let request = self.http.request(method, &url).bearer_auth(token).send();
        let response = match tokio::time::timeout(per_call_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(DownstreamFailure::Transport(err.to_string())),
            Err(_) => return Err(DownstreamFailure::Timeout),
        };
        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(RawOutcome::Unauthorized);
        }
        if !response.status().is_success() {
            return Ok(RawOutcome::Http(response.status().as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| DownstreamFailure::Transport(err.to_string()))?;
        Ok(RawOutcome::Success(bytes))
    }

    /// Issues one GET against `path` on `location`, authenticated with a
    /// cached or freshly minted JWT, deserializes the envelope's `data` as
    /// `T`, and retries exactly once on a 401. `deadline_remaining` is the
    /// caller's overall-deadline slice; the actual per-call timeout is
    /// `min(location.timeout, deadline_remaining)`.
    pub async fn fetch<T: DeserializeOwned>(&self, location: &Location, path: &str, deadline_remaining: Duration) -> Result<T, DownstreamFailure> {
        match self.breakers.admit(&location.id) {
            Admission::ShortCircuit => {
                self.on_failure(&location.id, &DownstreamFailure::CircuitOpen);
                return Err(DownstreamFailure::CircuitOpen);
            }
            Admission::Closed | Admission::Probe => {}
        }

        let per_call_timeout = deadline_remaining.min(location.timeout);
        let started = Instant::now();
        let result = self.fetch_inner::<T>(location, Method::GET, path, per_call_timeout).await;
        self.metrics.observe_fan_out(started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => self.on_success(&location.id),
            Err(failure) => self.on_failure(&location.id, failure),
        }
        result
    }

    async fn fetch_inner<T: DeserializeOwned>(
        &self,
        location: &Location,
        method: Method,
        path: &str,
        per_call_timeout: Duration,
    ) -> Result<T, DownstreamFailure> {
        let token = self.ensure_token(location, per_call_timeout).await?;
        match self.call_with_token(location, method.clone(), path, &token, per_call_timeout).await? {
            RawOutcome::Success(bytes) => decode_envelope(&bytes),
            RawOutcome::Http(code) => Err(DownstreamFailure::Http(code)),
            RawOutcome::Unauthorized => {
                debug!(location_id = %location.id, "downstream 401; evicting cached token and retrying once");
                self.token_cache.evict(&location.id);
                let fresh = self.mint_token(location, per_call_timeout).await?;
                match self.call_with_token(location, method, path, &fresh, per_call_timeout).await? {
                    RawOutcome::Success(bytes) => decode_envelope(&bytes),
                    RawOutcome::Http(code) => Err(DownstreamFailure::Http(code)),
                    RawOutcome::Unauthorized => {
                        warn!(location_id = %location.id, "second consecutive 401 after token refresh");
                        Err(DownstreamFailure::AuthFailure)
                    }
                }
            }
        }
    }

    /// Proxies an arbitrary method/path to `location`, for the
    /// `/place/{id}/*` and `/device/{name}/*` passthrough routes. Returns
    /// the raw response; callers stream status/body back to their own
    /// caller unchanged.
    pub async fn proxy(
        &self,
        location: &Location,
        method: Method,
        path: &str,
        deadline_remaining: Duration,
    ) -> Result<(StatusCode, Bytes), DownstreamFailure> {
        match self.breakers.admit(&location.id) {
            Admission::ShortCircuit => {
                self.on_failure(&location.id, &DownstreamFailure::CircuitOpen);
                return Err(DownstreamFailure::CircuitOpen);
            }
            Admission::Closed | Admission::Probe => {}
        }

        let per_call_timeout = deadline_remaining.min(location.timeout);
        let token = match self.ensure_token(location, per_call_timeout).await {
            Ok(token) => token,
            Err(err) => {
                self.on_failure(&location.id, &err);
                return Err(err);
            }
        };

        let outcome = self.call_with_token(location, method.clone(), path, &token, per_call_timeout).await;
        let outcome = match outcome {
            Ok(RawOutcome::Unauthorized) => {
                self.token_cache.evict(&location.id);
                let fresh = match self.mint_token(location, per_call_timeout).await {
                    Ok(token) => token,
                    Err(err) => {
                        self.on_failure(&location.id, &err);
                        return Err(err);
                    }
                };
                self.call_with_token(location, method, path, &fresh, per_call_timeout).await
            }
            other => other,
        };

        match outcome {
            Ok(RawOutcome::Success(bytes)) => {
                self.on_success(&location.id);
                Ok((StatusCode::OK, bytes))
            }
            Ok(RawOutcome::Http(code)) => {
                let failure = DownstreamFailure::Http(code);
                self.on_failure(&location.id, &failure);
                Err(failure)
            }
            Ok(RawOutcome::Unauthorized) => {
                self.on_failure(&location.id, &DownstreamFailure::AuthFailure);
                Err(DownstreamFailure::AuthFailure)
            }
            Err(err) => {
                self.on_failure(&location.id, &err);
                Err(err)
            }
        }
    }
}

fn decode_envelope<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DownstreamFailure> {
    let envelope: Envelope<T> = serde_json::from_slice(bytes).map_err(|err| DownstreamFailure::Malformed(err.to_string()))?;
    if !envelope.success {
        let message = envelope.error.map(|e| e.message).unwrap_or_else(|| "downstream reported failure".to_string());
        return Err(DownstreamFailure::Malformed(message));
    }
    envelope
        .data
        .ok_or_else(|| DownstreamFailure::Malformed("response missing data".to_string()))
}
