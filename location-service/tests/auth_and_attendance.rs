use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use common_security::SecurityConfig;
use device_protocol::fake::InMemoryDeviceConnector;
use device_protocol::{AttendanceEvent, DeviceError, PunchType, User};
use location_service::config::{DeviceEntry, LocationConfig};
use location_service::device_pool::DevicePool;
use location_service::model::AttendancePolicy;
use location_service::{build_router, AppState};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower::ServiceExt;

const API_KEY: &str = "location-test-key-at-least-32-bytes-long";

fn device_entry() -> DeviceEntry {
    DeviceEntry {
        ip: "127.0.0.1".to_string(),
        port: 4370,
        password: 0,
    }
}

fn base_config() -> LocationConfig {
    let mut devices = HashMap::new();
    devices.insert("front-door".to_string(), device_entry());
    LocationConfig {
        service_id: "location-test".to_string(),
        port: 0,
        api_key: API_KEY.to_string(),
        jwt_secret: b"a-location-test-secret-at-least-32-bytes".to_vec(),
        devices,
        policy: AttendancePolicy::default(),
        security: SecurityConfig::default(),
        device_op_timeout: Duration::from_secs(1),
        idle_ttl: Duration::from_secs(60),
        reaper_interval: Duration::from_secs(30),
    }
}

fn user(id: &str, name: &str) -> User {
    User {
        user_id: id.to_string(),
        name: name.to_string(),
        card_no: None,
        privilege: None,
        device_names: vec!["front-door".to_string()],
    }
}

fn ev(user_id: &str, h: u32, m: u32, kind: PunchType) -> AttendanceEvent {
    AttendanceEvent {
        user_id: user_id.to_string(),
        timestamp: Utc.with_ymd_and_hms(2026, 1, 6, h, m, 0).unwrap(),
        punch_type: kind,
        device_name: "front-door".to_string(),
    }
}

/// Replaces the production TCP-backed device pool installed by
/// `AppState::new` with one backed by `InMemoryDeviceConnector`, so a
/// handler test can exercise real enrichment without real hardware.
fn with_fake_pool(mut state: AppState, users: Vec<User>, events: Vec<AttendanceEvent>) -> AppState {
    let mut devices = HashMap::new();
    devices.insert("front-door".to_string(), device_entry());
    let connector = std::sync::Mutex::new(Some(InMemoryDeviceConnector::new("front-door", users, events)));
    let factory: location_service::device_pool::ConnectorFactory = Arc::new(move |_: &str, _: &DeviceEntry| {
        Box::new(connector.lock().unwrap().take().expect("factory invoked once per test"))
    });
    state.device_pool = Arc::new(RwLock::new(DevicePool::new(devices, factory, Duration::from_secs(1), Duration::from_secs(60))));
    state
}

/// Installs a `DevicePool` with two devices: `front-door` backed by the
/// given users/events, `back-door` backed by a connector that fails every
/// call with `error`.
fn with_two_device_pool(mut state: AppState, users: Vec<User>, events: Vec<AttendanceEvent>, error: DeviceError) -> AppState {
    let mut devices = HashMap::new();
    devices.insert("front-door".to_string(), device_entry());
    devices.insert("back-door".to_string(), device_entry());
    let healthy = std::sync::Mutex::new(Some(InMemoryDeviceConnector::new("front-door", users, events)));
    let failing = std::sync::Mutex::new(Some(InMemoryDeviceConnector::failing("back-door", error)));
    let factory: location_service::device_pool::ConnectorFactory = Arc::new(move |name: &str, _: &DeviceEntry| {
        if name == "front-door" {
            Box::new(healthy.lock().unwrap().take().expect("factory invoked once per test"))
        } else {
            Box::new(failing.lock().unwrap().take().expect("factory invoked once per test"))
        }
    });
    state.device_pool = Arc::new(RwLock::new(DevicePool::new(devices, factory, Duration::from_secs(1), Duration::from_secs(60))));
    state
}

fn peer() -> SocketAddr {
    "127.0.0.1:9100".parse().unwrap()
}

fn authed_request(method: &str, uri: &str) -> Request<Body> {
    let mut req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    req.extensions_mut().insert(ConnectInfo(peer()));
    req.headers_mut().insert("x-api-key", API_KEY.parse().unwrap());
    req
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1_000_000).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn auth_chain_rejects_wrong_key_and_issues_for_correct_key() {
    let state = AppState::new(base_config()).unwrap();
    let app = build_router(state);

    let mut req = Request::builder()
        .method("POST")
        .uri("/auth/token")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "api_key": "wrong-key" }).to_string()))
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(peer()));
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "AUTH_INVALID");

    let mut req = Request::builder()
        .method("POST")
        .uri("/auth/token")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "api_key": API_KEY }).to_string()))
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(peer()));
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert!(body["data"]["access_token"].is_string());
    assert_eq!(body["data"]["token_type"], json!("bearer"));
}

#[tokio::test]
async fn unauthenticated_request_is_rejected_before_reaching_handler() {
    let state = AppState::new(base_config()).unwrap();
    let app = build_router(state);
    let mut req = Request::builder().method("GET").uri("/devices").body(Body::empty()).unwrap();
    req.extensions_mut().insert(ConnectInfo(peer()));
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "AUTH_REQUIRED");
}

#[tokio::test]
async fn attendance_within_grace_is_present_with_computed_hours() {
    let state = AppState::new(base_config()).unwrap();
    let state = with_fake_pool(
        state,
        vec![user("u1", "Alice")],
        vec![ev("u1", 8, 5, PunchType::In), ev("u1", 17, 10, PunchType::Out)],
    );
    let app = build_router(state);

    let resp = app
        .oneshot(authed_request("GET", "/attendance?start=2026-01-06&end=2026-01-06"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], json!("present"));
    assert_eq!(records[0]["total_hours"], json!("9.08"));
    assert_eq!(records[0]["is_working_day"], json!(true));
}

#[tokio::test]
async fn holiday_query_param_overrides_status_but_hours_still_compute() {
    let state = AppState::new(base_config()).unwrap();
    let state = with_fake_pool(
        state,
        vec![user("u1", "Alice")],
        vec![ev("u1", 8, 5, PunchType::In), ev("u1", 17, 10, PunchType::Out)],
    );
    let app = build_router(state);

    let resp = app
        .oneshot(authed_request(
            "GET",
            "/attendance?start=2026-01-06&end=2026-01-06&holidays=2026-01-06",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    let records = body["data"].as_array().unwrap();
    assert_eq!(records[0]["status"], json!("holiday"));
    assert_eq!(records[0]["is_working_day"], json!(false));
    assert_eq!(records[0]["total_hours"], json!("9.08"));
}

#[tokio::test]
async fn attendance_range_validation_rejects_start_after_end() {
    let state = AppState::new(base_config()).unwrap();
    let app = build_router(state);
    let resp = app
        .oneshot(authed_request("GET", "/attendance?start=2026-01-10&end=2026-01-01"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "BAD_REQUEST");
}

#[tokio::test]
async fn unknown_device_name_is_not_found() {
    let state = AppState::new(base_config()).unwrap();
    let app = build_router(state);
    let resp = app
        .oneshot(authed_request("GET", "/attendance?device=side-door&start=2026-01-01&end=2026-01-02"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn requests_past_rate_limit_capacity_are_rejected() {
    let mut config = base_config();
    config.security.rate_limit_capacity = 2;
    config.security.rate_limit_window = Duration::from_secs(60);
    let state = AppState::new(config).unwrap();
    let app = build_router(state);

    for _ in 0..2 {
        let resp = app.clone().oneshot(authed_request("GET", "/devices")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = app.oneshot(authed_request("GET", "/devices")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().get("Retry-After").is_some());
}

#[tokio::test]
async fn cross_device_attendance_reports_partial_failure_for_unreachable_device() {
    let state = AppState::new(base_config()).unwrap();
    let state = with_two_device_pool(
        state,
        vec![user("u1", "Alice")],
        vec![ev("u1", 8, 5, PunchType::In), ev("u1", 17, 10, PunchType::Out)],
        DeviceError::Unreachable("back-door".to_string()),
    );
    let app = build_router(state);

    let resp = app
        .oneshot(authed_request("GET", "/attendance?start=2026-01-06&end=2026-01-06"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;

    assert_eq!(body["metadata"]["partial"], json!(true));
    let failures = body["metadata"]["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["location_id"], json!("back-door"));
    assert_eq!(failures[0]["reason"], json!("unreachable"));

    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["user_id"], json!("u1"));
    assert_eq!(records[0]["status"], json!("present"));
}
