use axum::http::StatusCode;
use axum::response::IntoResponse;
use common_http_errors::{ApiError, FailureDetail};

#[test]
fn auth_required_variant() {
    let resp = ApiError::AuthRequired { request_id: None }.into_response();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "AUTH_REQUIRED");
}

#[test]
fn auth_invalid_variant() {
    let resp = ApiError::AuthInvalid { request_id: None }.into_response();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "AUTH_INVALID");
}

#[test]
fn forbidden_variant() {
    let resp = ApiError::Forbidden { request_id: None }.into_response();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "FORBIDDEN");
}

#[test]
fn rate_limited_variant_sets_retry_after() {
    let resp = ApiError::RateLimited {
        request_id: None,
        retry_after_secs: 120,
    }
    .into_response();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "RATE_LIMITED");
    assert_eq!(resp.headers().get("Retry-After").unwrap(), "120");
}

#[test]
fn bad_request_variant_carries_custom_code() {
    let resp = ApiError::BadRequest {
        request_id: None,
        code: "invalid_date_range",
        message: "start must be <= end".into(),
    }
    .into_response();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        resp.headers().get("X-Error-Code").unwrap(),
        "invalid_date_range"
    );
}

#[test]
fn not_found_variant() {
    let resp = ApiError::NotFound {
        request_id: None,
        message: "unknown device".into(),
    }
    .into_response();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "NOT_FOUND");
}

#[test]
fn conflict_variant() {
    let resp = ApiError::Conflict {
        request_id: None,
        message: "ambiguous device name".into(),
    }
    .into_response();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "CONFLICT");
}

#[test]
fn upstream_unavailable_variant_carries_failures() {
    let resp = ApiError::UpstreamUnavailable {
        request_id: None,
        failures: vec![FailureDetail {
            location_id: "loc-a".into(),
            reason: "timeout".into(),
        }],
    }
    .into_response();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        resp.headers().get("X-Error-Code").unwrap(),
        "UPSTREAM_UNAVAILABLE"
    );
}

#[test]
fn timeout_variant() {
    let resp = ApiError::Timeout { request_id: None }.into_response();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "TIMEOUT");
}

#[test]
fn internal_variant_never_echoes_message_body() {
    let resp = ApiError::Internal {
        request_id: None,
        message: "postgres connection refused at 10.0.0.5:5432".into(),
    }
    .into_response();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "INTERNAL");
}
