use std::time::{Duration, Instant};

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::NaiveDate;
use common_auth::{PlaceBackendOnly, Principal, PrincipalKind};
use common_http_errors::{ApiError, ApiResult, Envelope, FailureDetail};
use device_protocol::{Device, User};
use futures::stream::{self, StreamExt};
use location_service::{AttendanceRecord, DailySummary};
use location_service::handlers::HealthResponse as LocationHealthResponse;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppState;
use crate::circuit_breaker::BreakerState;
use crate::downstream::DownstreamFailure;
use crate::locations::{DeviceResolution, Location};
use crate::model::{merge_attendance, merge_daily_summaries, merge_users, GatewayDevice, GatewayUser, PlaceSummary, UserMergeMode};

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

async fn issue_token(state: &AppState, request_id: uuid::Uuid, api_key: &str, kind: PrincipalKind, expected: &str) -> ApiResult<TokenResponse> {
    if api_key != expected {
        state.metrics.record_auth_outcome("rejected");
        return Err(ApiError::AuthInvalid { request_id: Some(request_id) });
    }
    state.metrics.record_auth_outcome("issued");
    let issued = state.jwt.issue(kind).map_err(|e| ApiError::from(e).with_request_id(request_id))?;
    Ok(TokenResponse {
        access_token: issued.access_token,
        token_type: "bearer",
        expires_in: issued.expires_in,
    })
}

/// POST `/auth/frontend/token`.
pub async fn issue_frontend_token(
    State(state): State<AppState>,
    request_id: common_security::RequestId,
    Json(body): Json<TokenRequest>,
) -> ApiResult<Json<Envelope<TokenResponse>>> {
    let response = issue_token(&state, request_id.0, &body.api_key, PrincipalKind::Frontend, &state.config.frontend_api_key).await?;
    Ok(Json(Envelope::ok(request_id.0, response)))
}

/// POST `/auth/place/token`.
pub async fn issue_place_token(
    State(state): State<AppState>,
    request_id: common_security::RequestId,
    Json(body): Json<TokenRequest>,
) -> ApiResult<Json<Envelope<TokenResponse>>> {
    let response = issue_token(&state, request_id.0, &body.api_key, PrincipalKind::PlaceBackend, &state.config.place_backend_api_key).await?;
    Ok(Json(Envelope::ok(request_id.0, response)))
}

fn overall_deadline(state: &AppState) -> Instant {
    Instant::now() + state.config.fan_out_deadline
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Runs `call` against every given Location concurrently, bounded by the
/// configured fan-out concurrency limit, and partitions the results into
/// successes and per-Location failures.
async fn fan_out<T, F, Fut>(state: &AppState, locations: Vec<Location>, deadline: Instant, call: F) -> (Vec<(Location, T)>, Vec<FailureDetail>)
where
    F: Fn(Location, Duration) -> Fut,
    Fut: std::future::Future<Output = Result<T, DownstreamFailure>>,
{
    let results: Vec<(Location, Result<T, DownstreamFailure>)> = stream::iter(locations)
        .map(|location| {
            let fut = call(location.clone(), remaining(deadline));
            async move { (location, fut.await) }
        })
        .buffer_unordered(state.config.fan_out_concurrency)
        .collect()
        .await;

    let mut oks = Vec::new();
    let mut failures = Vec::new();
    for (location, result) in results {
        match result {
            Ok(value) => oks.push((location, value)),
            Err(err) => failures.push(FailureDetail {
                location_id: location.id,
                reason: err.reason().to_string(),
            }),
        }
    }
    (oks, failures)
}

fn envelope<T: Serialize>(request_id: uuid::Uuid, data: T, failures: Vec<FailureDetail>) -> Envelope<T> {
    if failures.is_empty() {
        Envelope::ok(request_id, data)
    } else {
        Envelope::ok_partial(request_id, data, failures)
    }
}

#[derive(Debug, Serialize)]
pub struct PlaceHealth {
    pub location_id: String,
    pub status: String,
    pub breaker_state: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub places: Vec<PlaceHealth>,
    pub uptime_s: u64,
}

fn breaker_label(state: BreakerState) -> &'static str {
    match state {
        BreakerState::Closed => "closed",
        BreakerState::Open => "open",
        BreakerState::HalfOpen => "half_open",
    }
}

/// GET `/health`: fans out to every enabled Location's own `/health` and
/// aggregates the result; a Location that fails to answer is reported as
/// `unreachable` rather than dropped.
pub async fn health(State(state): State<AppState>, request_id: common_security::RequestId) -> Json<Envelope<HealthResponse>> {
    let locations = state.locations.read().await.enabled().into_iter().cloned().collect::<Vec<_>>();
    let deadline = overall_deadline(&state);
    let downstream = state.downstream.clone();
    let (oks, failures) = fan_out(&state, locations.clone(), deadline, move |location, budget| {
        let downstream = downstream.clone();
        async move { downstream.fetch::<LocationHealthResponse>(&location, "/health", budget).await }
    })
    .await;

    let mut places: Vec<PlaceHealth> = oks
        .into_iter()
        .map(|(location, health)| PlaceHealth {
            location_id: location.id.clone(),
            status: health.status.to_string(),
            breaker_state: breaker_label(state.downstream.breaker_state(&location.id)),
        })
        .collect();
    for failure in &failures {
        places.push(PlaceHealth {
            location_id: failure.location_id.clone(),
            status: "unreachable".to_string(),
            breaker_state: breaker_label(state.downstream.breaker_state(&failure.location_id)),
        });
    }
    places.sort_by(|a, b| a.location_id.cmp(&b.location_id));

    let status = if failures.is_empty() { "ok" } else { "degraded" };
    Json(Envelope::ok(
        request_id.0,
        HealthResponse {
            status,
            places,
            uptime_s: state.started_at.elapsed().as_secs(),
        },
    ))
}

/// GET `/places`: the registry as configured, no downstream calls.
pub async fn list_places(
    State(state): State<AppState>,
    request_id: common_security::RequestId,
    _principal: Principal,
) -> Json<Envelope<Vec<PlaceSummary>>> {
    let registry = state.locations.read().await;
    let summaries: Vec<PlaceSummary> = registry
        .all()
        .into_iter()
        .map(|location| PlaceSummary {
            id: location.id.clone(),
            display_name: location.display_name.clone(),
            address: location.address.clone(),
            enabled: location.enabled,
            device_count: location.device_names.len(),
        })
        .collect();
    Json(Envelope::ok(request_id.0, summaries))
}

/// GET `/devices/all`: fans out to `/devices` on every enabled Location.
pub async fn list_all_devices(
    State(state): State<AppState>,
    request_id: common_security::RequestId,
    _principal: Principal,
) -> ApiResult<Json<Envelope<Vec<GatewayDevice>>>> {
    let locations = state.locations.read().await.enabled().into_iter().cloned().collect::<Vec<_>>();
    let deadline = overall_deadline(&state);
    let downstream = state.downstream.clone();
    let (oks, failures) = fan_out(&state, locations, deadline, move |location, budget| {
        let downstream = downstream.clone();
        async move { downstream.fetch::<Vec<Device>>(&location, "/devices", budget).await }
    })
    .await;

    if oks.is_empty() && !failures.is_empty() {
        return Err(ApiError::UpstreamUnavailable {
            request_id: Some(request_id.0),
            failures,
        });
    }

    let mut devices: Vec<GatewayDevice> = oks
        .into_iter()
        .flat_map(|(location, devices)| devices.into_iter().map(move |device| GatewayDevice { location_id: location.id.clone(), device }))
        .collect();
    devices.sort_by(|a, b| a.location_id.cmp(&b.location_id).then_with(|| a.device.name.cmp(&b.device.name)));
    Ok(Json(envelope(request_id.0, devices, failures)))
}

#[derive(Debug, Deserialize)]
pub struct UsersAllQuery {
    #[serde(default)]
    pub merge_by: Option<String>,
}

/// GET `/users/all?merge_by=user_id`: fans out to `/users` on every enabled
/// Location and merges per [`UserMergeMode`].
pub async fn list_all_users(
    State(state): State<AppState>,
    request_id: common_security::RequestId,
    _principal: Principal,
    Query(query): Query<UsersAllQuery>,
) -> ApiResult<Json<Envelope<Vec<GatewayUser>>>> {
    let locations = state.locations.read().await.enabled().into_iter().cloned().collect::<Vec<_>>();
    let deadline = overall_deadline(&state);
    let downstream = state.downstream.clone();
    let (oks, failures) = fan_out(&state, locations, deadline, move |location, budget| {
        let downstream = downstream.clone();
        async move { downstream.fetch::<Vec<User>>(&location, "/users", budget).await }
    })
    .await;

    if oks.is_empty() && !failures.is_empty() {
        return Err(ApiError::UpstreamUnavailable {
            request_id: Some(request_id.0),
            failures,
        });
    }

    let mode = if query.merge_by.as_deref() == Some("user_id") {
        UserMergeMode::ByUserId
    } else {
        UserMergeMode::PerLocation
    };
    let per_location: Vec<(String, Vec<User>)> = oks.into_iter().map(|(location, users)| (location.id, users)).collect();
    let users = merge_users(per_location, mode);
    Ok(Json(envelope(request_id.0, users, failures)))
}

#[derive(Debug, Deserialize)]
pub struct AttendanceAllQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub holidays: Option<String>,
}

fn validate_range(start: NaiveDate, end: NaiveDate) -> ApiResult<()> {
    const MAX_RANGE_DAYS: i64 = 370;
    if start > end {
        return Err(ApiError::BadRequest {
            request_id: None,
            code: "BAD_REQUEST",
            message: "start must not be after end".to_string(),
        });
    }
    if (end - start).num_days() > MAX_RANGE_DAYS {
        return Err(ApiError::BadRequest {
            request_id: None,
            code: "BAD_REQUEST",
            message: format!("date range exceeds {MAX_RANGE_DAYS} days"),
        });
    }
    Ok(())
}

fn attendance_path(query: &AttendanceAllQuery, summary: bool) -> String {
    let base = if summary { "/attendance/summary" } else { "/attendance" };
    match &query.holidays {
        Some(h) if !h.is_empty() => format!("{base}?start={}&end={}&holidays={}", query.start, query.end, h),
        _ => format!("{base}?start={}&end={}", query.start, query.end),
    }
}

/// GET `/attendance/all?start=&end=&holidays=`: fans out to `/attendance`
/// on every enabled Location and concatenates the results.
pub async fn attendance_all(
    State(state): State<AppState>,
    request_id: common_security::RequestId,
    _principal: Principal,
    Query(query): Query<AttendanceAllQuery>,
) -> ApiResult<Json<Envelope<Vec<AttendanceRecord>>>> {
    validate_range(query.start, query.end).map_err(|e| e.with_request_id(request_id.0))?;
    let locations = state.locations.read().await.enabled().into_iter().cloned().collect::<Vec<_>>();
    let deadline = overall_deadline(&state);
    let downstream = state.downstream.clone();
    let path = attendance_path(&query, false);
    let (oks, failures) = fan_out(&state, locations, deadline, move |location, budget| {
        let downstream = downstream.clone();
        let path = path.clone();
        async move { downstream.fetch::<Vec<AttendanceRecord>>(&location, &path, budget).await }
    })
    .await;

    if oks.is_empty() && !failures.is_empty() {
        return Err(ApiError::UpstreamUnavailable {
            request_id: Some(request_id.0),
            failures,
        });
    }

    let per_location: Vec<Vec<AttendanceRecord>> = oks.into_iter().map(|(_, records)| records).collect();
    let records = merge_attendance(per_location);
    Ok(Json(envelope(request_id.0, records, failures)))
}

/// GET `/summary/all?start=&end=&holidays=`: fans out to
/// `/attendance/summary` and sums counts per date across Locations.
pub async fn summary_all(
    State(state): State<AppState>,
    request_id: common_security::RequestId,
    _principal: Principal,
    Query(query): Query<AttendanceAllQuery>,
) -> ApiResult<Json<Envelope<Vec<DailySummary>>>> {
    validate_range(query.start, query.end).map_err(|e| e.with_request_id(request_id.0))?;
    let locations = state.locations.read().await.enabled().into_iter().cloned().collect::<Vec<_>>();
    let deadline = overall_deadline(&state);
    let downstream = state.downstream.clone();
    let path = attendance_path(&query, true);
    let (oks, failures) = fan_out(&state, locations, deadline, move |location, budget| {
        let downstream = downstream.clone();
        let path = path.clone();
        async move { downstream.fetch::<Vec<DailySummary>>(&location, &path, budget).await }
    })
    .await;

    if oks.is_empty() && !failures.is_empty() {
        return Err(ApiError::UpstreamUnavailable {
            request_id: Some(request_id.0),
            failures,
        });
    }

    let per_location: Vec<DailySummary> = oks.into_iter().flat_map(|(_, summaries)| summaries).collect();
    let summaries = merge_daily_summaries(per_location);
    Ok(Json(envelope(request_id.0, summaries, failures)))
}

fn forward_path(path: &str, query: Option<&str>) -> String {
    let path = if let Some(stripped) = path.strip_prefix('/') {
        stripped
    } else {
        path
    };
    match query {
        Some(q) if !q.is_empty() => format!("/{path}?{q}"),
        _ => format!("/{path}"),
    }
}

/// GET `/place/{id}/*path`: transparent proxy to a named Location.
pub async fn proxy_place(
    State(state): State<AppState>,
    request_id: common_security::RequestId,
    _principal: Principal,
    Path((id, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> ApiResult<axum::response::Response> {
    let location = state
        .locations
        .read()
        .await
        .get(&id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound {
            request_id: Some(request_id.0),
            message: format!("place '{id}' is not registered"),
        })?;

    let deadline = overall_deadline(&state);
    let forwarded = forward_path(&path, query.as_deref());
    let (status, bytes) = state
        .downstream
        .proxy(&location, reqwest::Method::GET, &forwarded, remaining(deadline))
        .await
        .map_err(|err| proxy_failure_to_api(err, request_id.0, &location.id))?;
    Ok((StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::OK), bytes).into_response())
}

/// GET `/device/{name}/*path`: resolves `name` to its owning Location and
/// proxies there. A device registered under more than one Location answers
/// `409 CONFLICT` instead of guessing.
pub async fn proxy_device(
    State(state): State<AppState>,
    request_id: common_security::RequestId,
    _principal: Principal,
    Path((name, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> ApiResult<axum::response::Response> {
    let registry = state.locations.read().await;
    let location = match registry.resolve_device(&name) {
        DeviceResolution::NotFound => {
            return Err(ApiError::NotFound {
                request_id: Some(request_id.0),
                message: format!("device '{name}' is not registered at any Location"),
            })
        }
        DeviceResolution::Ambiguous(owners) => {
            return Err(ApiError::Conflict {
                request_id: Some(request_id.0),
                message: format!("device '{name}' is registered under multiple Locations: {}", owners.join(", ")),
            })
        }
        DeviceResolution::Unique(location) => location.clone(),
    };
    drop(registry);

    let deadline = overall_deadline(&state);
    let forwarded = forward_path(&path, query.as_deref());
    let (status, bytes) = state
        .downstream
        .proxy(&location, reqwest::Method::GET, &forwarded, remaining(deadline))
        .await
        .map_err(|err| proxy_failure_to_api(err, request_id.0, &location.id))?;
    Ok((StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::OK), bytes).into_response())
}

fn proxy_failure_to_api(err: DownstreamFailure, request_id: uuid::Uuid, location_id: &str) -> ApiError {
    match err {
        DownstreamFailure::AuthFailure => ApiError::UpstreamUnavailable {
            request_id: Some(request_id),
            failures: vec![FailureDetail {
                location_id: location_id.to_string(),
                reason: "auth_failure".to_string(),
            }],
        },
        DownstreamFailure::Timeout => ApiError::Timeout { request_id: Some(request_id) },
        other => ApiError::UpstreamUnavailable {
            request_id: Some(request_id),
            failures: vec![FailureDetail {
                location_id: location_id.to_string(),
                reason: other.reason().to_string(),
            }],
        },
    }
}

/// POST `/reload-config`, `kind=PlaceBackend` only.
pub async fn reload_config(
    State(state): State<AppState>,
    request_id: common_security::RequestId,
    _principal: Principal<PlaceBackendOnly>,
) -> ApiResult<Json<Envelope<serde_json::Value>>> {
    let locations = state.reload_locations().await.map_err(|e| ApiError::Internal {
        request_id: Some(request_id.0),
        message: e.to_string(),
    })?;
    info!(location_count = locations, "gateway configuration reloaded");
    Ok(Json(Envelope::ok(request_id.0, serde_json::json!({ "locations_loaded": locations }))))
}

pub async fn metrics(State(state): State<AppState>) -> axum::response::Response {
    match state.metrics.render() {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(%err, "failed to render metrics");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
