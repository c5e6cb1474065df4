use std::collections::BTreeSet;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::NaiveDate;
use common_auth::{PlaceBackendOnly, Principal};
use common_http_errors::{ApiError, ApiResult, Envelope, FailureDetail};
use common_security::RequestId;
use device_protocol::{DeviceError, User};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppState;
use crate::model::{enrich_attendance, summarize_day, AttendanceRecord, DailySummary};

const MAX_RANGE_DAYS: i64 = 370;

fn device_error_to_api(err: &DeviceError, request_id: uuid::Uuid) -> ApiError {
    ApiError::UpstreamUnavailable {
        request_id: Some(request_id),
        failures: vec![FailureDetail {
            location_id: err.device_name().to_string(),
            reason: err.reason().to_string(),
        }],
    }
}

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

/// POST `/auth/token`: exchanges this Location's API key for a bearer JWT.
pub async fn issue_token(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(body): Json<TokenRequest>,
) -> ApiResult<Json<Envelope<TokenResponse>>> {
    if body.api_key != state.config.api_key {
        state.metrics.record_auth_outcome("rejected");
        return Err(ApiError::AuthInvalid {
            request_id: Some(request_id.0),
        });
    }
    state.metrics.record_auth_outcome("issued");
    let issued = state
        .jwt
        .issue(common_auth::PrincipalKind::PlaceBackend)
        .map_err(|e| ApiError::from(e).with_request_id(request_id.0))?;
    Ok(Json(Envelope::ok(
        request_id.0,
        TokenResponse {
            access_token: issued.access_token,
            token_type: "bearer",
            expires_in: issued.expires_in,
        },
    )))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceHealth {
    pub name: String,
    pub reachable: bool,
}

/// `Deserialize` is derived alongside `Serialize` because the Gateway
/// parses this exact shape back out of a Location's `/health` response
/// when aggregating fleet-wide health.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub devices: Vec<DeviceHealth>,
    pub uptime_s: u64,
}

/// GET `/health`: probes every configured device synchronously.
pub async fn health(
    State(state): State<AppState>,
    request_id: RequestId,
) -> ApiResult<Json<Envelope<HealthResponse>>> {
    let pool = state.device_pool.read().await;
    let mut devices = Vec::new();
    for name in pool.device_names() {
        let reachable = pool.probe(&name).await;
        devices.push(DeviceHealth { name, reachable });
    }
    let status = if devices.iter().all(|d| d.reachable) || devices.is_empty() {
        "ok"
    } else {
        "degraded"
    };
    Ok(Json(Envelope::ok(
        request_id.0,
        HealthResponse {
            status: status.to_string(),
            devices,
            uptime_s: state.started_at.elapsed().as_secs(),
        },
    )))
}

/// GET `/devices`: the registry minus passwords.
pub async fn list_devices(
    State(state): State<AppState>,
    request_id: RequestId,
    _principal: Principal,
) -> ApiResult<Json<Envelope<Vec<device_protocol::Device>>>> {
    Ok(Json(Envelope::ok(request_id.0, state.device_pool.read().await.devices())))
}

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    pub device: Option<String>,
    #[serde(default)]
    pub include_unknown: bool,
}

/// GET `/users?device=&include_unknown=`.
pub async fn list_users(
    State(state): State<AppState>,
    request_id: RequestId,
    _principal: Principal,
    Query(query): Query<UsersQuery>,
) -> ApiResult<Json<Envelope<Vec<User>>>> {
    let pool = state.device_pool.read().await;
    if let Some(device) = &query.device {
        if pool.device_entry(device).is_none() {
            return Err(ApiError::NotFound {
                request_id: Some(request_id.0),
                message: format!("device '{device}' is not configured"),
            });
        }
        let users = pool
            .get_users(device)
            .await
            .map_err(|e| device_error_to_api(&e, request_id.0))?;
        let users = filter_unknown(users, query.include_unknown);
        return Ok(Json(Envelope::ok(request_id.0, users)));
    }

    let mut merged: std::collections::BTreeMap<String, User> = std::collections::BTreeMap::new();
    let mut failures = Vec::new();
    let mut successes = 0usize;
    for name in pool.device_names() {
        match pool.get_users(&name).await {
            Ok(users) => {
                successes += 1;
                for user in filter_unknown(users, query.include_unknown) {
                    merged
                        .entry(user.user_id.clone())
                        .and_modify(|existing| {
                            for device_name in &user.device_names {
                                if !existing.device_names.contains(device_name) {
                                    existing.device_names.push(device_name.clone());
                                }
                            }
                        })
                        .or_insert(user);
                }
            }
            Err(e) => failures.push(FailureDetail {
                location_id: e.device_name().to_string(),
                reason: e.reason().to_string(),
            }),
        }
    }
    if successes == 0 && !failures.is_empty() {
        return Err(ApiError::UpstreamUnavailable {
            request_id: Some(request_id.0),
            failures,
        });
    }
    let users = merged.into_values().collect();
    Ok(Json(if failures.is_empty() {
        Envelope::ok(request_id.0, users)
    } else {
        Envelope::ok_partial(request_id.0, users, failures)
    }))
}

fn filter_unknown(users: Vec<User>, include_unknown: bool) -> Vec<User> {
    if include_unknown {
        users
    } else {
        users.into_iter().filter(|u| !u.user_id.is_empty()).collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct AttendanceQuery {
    pub device: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub holidays: Option<String>,
}

fn parse_holidays(raw: &Option<String>) -> ApiResult<BTreeSet<NaiveDate>> {
    let Some(raw) = raw else {
        return Ok(BTreeSet::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<NaiveDate>().map_err(|_| ApiError::BadRequest {
                request_id: None,
                code: "BAD_REQUEST",
                message: format!("invalid holiday date '{s}'"),
            })
        })
        .collect()
}

fn validate_range(start: NaiveDate, end: NaiveDate) -> ApiResult<()> {
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

/// Events, known users, user names, and per-device failures collected
/// across the queried device set.
struct Gathered {
    events: Vec<device_protocol::AttendanceEvent>,
    known_users: BTreeSet<String>,
    user_names: std::collections::BTreeMap<String, String>,
    failures: Vec<FailureDetail>,
}

/// Reads raw attendance events and user directories from the queried
/// devices. A single named device (`query.device = Some(_)`) that fails is
/// a hard error. A cross-device query (`query.device = None`) instead
/// collects per-device failures in `Gathered::failures` and keeps the data
/// from whichever devices answered, only hard-failing if every device in
/// the set errored.
async fn gather(state: &AppState, query: &AttendanceQuery, request_id: uuid::Uuid) -> ApiResult<Gathered> {
    validate_range(query.start, query.end).map_err(|e| e.with_request_id(request_id))?;

    let pool = state.device_pool.read().await;
    let device_names = match &query.device {
        Some(name) => {
            if pool.device_entry(name).is_none() {
                return Err(ApiError::NotFound {
                    request_id: Some(request_id),
                    message: format!("device '{name}' is not configured"),
                });
            }
            vec![name.clone()]
        }
        None => pool.device_names(),
    };

    let mut events = Vec::new();
    let mut known_users = BTreeSet::new();
    let mut user_names = std::collections::BTreeMap::new();
    let mut failures = Vec::new();
    let mut successes = 0usize;
    for name in &device_names {
        let device_events = match pool.get_attendance(name).await {
            Ok(events) => events,
            Err(e) => {
                if query.device.is_some() {
                    return Err(device_error_to_api(&e, request_id));
                }
                failures.push(FailureDetail {
                    location_id: e.device_name().to_string(),
                    reason: e.reason().to_string(),
                });
                continue;
            }
        };
        successes += 1;
        let device_users = pool.get_users(name).await.unwrap_or_default();
        for user in device_users {
            known_users.insert(user.user_id.clone());
            user_names.insert(user.user_id.clone(), user.name.clone());
        }
        events.extend(device_events);
    }

    if successes == 0 && !failures.is_empty() {
        return Err(ApiError::UpstreamUnavailable {
            request_id: Some(request_id),
            failures,
        });
    }

    Ok(Gathered {
        events,
        known_users,
        user_names,
        failures,
    })
}

/// GET `/attendance?device=&start=&end=&holidays=`.
pub async fn attendance(
    State(state): State<AppState>,
    request_id: RequestId,
    _principal: Principal,
    Query(query): Query<AttendanceQuery>,
) -> ApiResult<Json<Envelope<Vec<AttendanceRecord>>>> {
    let request_holidays = parse_holidays(&query.holidays).map_err(|e| e.with_request_id(request_id.0))?;
    let gathered = gather(&state, &query, request_id.0).await?;
    let policy = state.policy.read().await.clone();
    let records = enrich_attendance(
        &gathered.events,
        &gathered.known_users,
        &gathered.user_names,
        query.start,
        query.end,
        &policy,
        &request_holidays,
        None,
    );
    Ok(Json(if gathered.failures.is_empty() {
        Envelope::ok(request_id.0, records)
    } else {
        Envelope::ok_partial(request_id.0, records, gathered.failures)
    }))
}

/// GET `/attendance/summary?...`.
pub async fn attendance_summary(
    State(state): State<AppState>,
    request_id: RequestId,
    _principal: Principal,
    Query(query): Query<AttendanceQuery>,
) -> ApiResult<Json<Envelope<Vec<DailySummary>>>> {
    let request_holidays = parse_holidays(&query.holidays).map_err(|e| e.with_request_id(request_id.0))?;
    let gathered = gather(&state, &query, request_id.0).await?;
    let policy = state.policy.read().await.clone();
    let records = enrich_attendance(
        &gathered.events,
        &gathered.known_users,
        &gathered.user_names,
        query.start,
        query.end,
        &policy,
        &request_holidays,
        None,
    );

    let mut by_date: std::collections::BTreeMap<NaiveDate, Vec<&AttendanceRecord>> = std::collections::BTreeMap::new();
    for record in &records {
        by_date.entry(record.date).or_default().push(record);
    }
    let summaries: Vec<DailySummary> = by_date
        .into_iter()
        .map(|(date, recs)| summarize_day(date, None, query.device.as_deref(), &recs))
        .collect();
    Ok(Json(if gathered.failures.is_empty() {
        Envelope::ok(request_id.0, summaries)
    } else {
        Envelope::ok_partial(request_id.0, summaries, gathered.failures)
    }))
}

/// POST `/reload-config`, `kind=PlaceBackend` only.
pub async fn reload_config(
    State(state): State<AppState>,
    request_id: RequestId,
    _principal: Principal<PlaceBackendOnly>,
) -> ApiResult<Json<Envelope<serde_json::Value>>> {
    let devices = state.reload_devices().await.map_err(|e| ApiError::Internal {
        request_id: Some(request_id.0),
        message: e.to_string(),
    })?;
    info!(device_count = devices, "configuration reloaded");
    Ok(Json(Envelope::ok(request_id.0, serde_json::json!({ "devices_loaded": devices }))))
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
