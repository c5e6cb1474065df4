use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::envelope::{Envelope, ErrorDetail, FailureDetail, Metadata};

pub type ApiResult<T> = Result<T, ApiError>;

/// The stable error taxonomy shared across the fleet. Every rejection -
/// security middleware or business handler - is one of these.
#[derive(Debug)]
pub enum ApiError {
    /// No credential presented at all.
    AuthRequired { request_id: Option<Uuid> },
    /// Bad key, bad signature, expired JWT, or wrong `kind` - all look
    /// identical to the caller by design.
    AuthInvalid { request_id: Option<Uuid> },
    /// Caller IP not on the allow-list.
    Forbidden { request_id: Option<Uuid> },
    /// Sliding-window rate limit exceeded; `retry_after_secs` becomes the
    /// `Retry-After` header.
    RateLimited {
        request_id: Option<Uuid>,
        retry_after_secs: u64,
    },
    /// Parameter validation or content screening failure.
    BadRequest {
        request_id: Option<Uuid>,
        code: &'static str,
        message: String,
    },
    /// Unknown device or location.
    NotFound {
        request_id: Option<Uuid>,
        message: String,
    },
    /// Ambiguous device-name resolution (registered under >1 Location).
    Conflict {
        request_id: Option<Uuid>,
        message: String,
    },
    /// Every downstream call failed; `failures` explains why per target.
    UpstreamUnavailable {
        request_id: Option<Uuid>,
        failures: Vec<FailureDetail>,
    },
    /// The overall request deadline elapsed before a result was available.
    Timeout { request_id: Option<Uuid> },
    /// Unexpected internal failure. Message is logged, never echoed in full.
    Internal {
        request_id: Option<Uuid>,
        message: String,
    },
}

impl ApiError {
    pub fn with_request_id(mut self, id: Uuid) -> Self {
        *self.request_id_mut() = Some(id);
        self
    }

    fn request_id_mut(&mut self) -> &mut Option<Uuid> {
        match self {
            ApiError::AuthRequired { request_id }
            | ApiError::AuthInvalid { request_id }
            | ApiError::Forbidden { request_id }
            | ApiError::RateLimited { request_id, .. }
            | ApiError::BadRequest { request_id, .. }
            | ApiError::NotFound { request_id, .. }
            | ApiError::Conflict { request_id, .. }
            | ApiError::UpstreamUnavailable { request_id, .. }
            | ApiError::Timeout { request_id }
            | ApiError::Internal { request_id, .. } => request_id,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::AuthRequired { .. } => "AUTH_REQUIRED",
            ApiError::AuthInvalid { .. } => "AUTH_INVALID",
            ApiError::Forbidden { .. } => "FORBIDDEN",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::BadRequest { code, .. } => code,
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::Conflict { .. } => "CONFLICT",
            ApiError::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            ApiError::Timeout { .. } => "TIMEOUT",
            ApiError::Internal { .. } => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::AuthRequired { .. } | ApiError::AuthInvalid { .. } => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::AuthRequired { .. } => "authentication required".to_string(),
            ApiError::AuthInvalid { .. } => "invalid credentials".to_string(),
            ApiError::Forbidden { .. } => "request origin is not allowed".to_string(),
            ApiError::RateLimited { retry_after_secs, .. } => {
                format!("rate limit exceeded, retry after {retry_after_secs}s")
            }
            ApiError::BadRequest { message, .. } => message.clone(),
            ApiError::NotFound { message, .. } => message.clone(),
            ApiError::Conflict { message, .. } => message.clone(),
            ApiError::UpstreamUnavailable { .. } => {
                "all downstream locations failed".to_string()
            }
            ApiError::Timeout { .. } => "request deadline elapsed".to_string(),
            // Internal messages are logged server-side by From impls but never
            // echoed verbatim to the caller, to avoid leaking internals.
            ApiError::Internal { .. } => "internal error".to_string(),
        }
    }

    fn request_id(&self) -> Uuid {
        match self {
            ApiError::AuthRequired { request_id }
            | ApiError::AuthInvalid { request_id }
            | ApiError::Forbidden { request_id }
            | ApiError::RateLimited { request_id, .. }
            | ApiError::BadRequest { request_id, .. }
            | ApiError::NotFound { request_id, .. }
            | ApiError::Conflict { request_id, .. }
            | ApiError::UpstreamUnavailable { request_id, .. }
            | ApiError::Timeout { request_id }
            | ApiError::Internal { request_id, .. } => request_id.unwrap_or_else(Uuid::new_v4),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let retry_after = match &self {
            ApiError::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        };
        let failures = match &self {
            ApiError::UpstreamUnavailable { failures, .. } => Some(failures.clone()),
            _ => None,
        };

        if matches!(self, ApiError::Internal { .. }) {
            tracing::error!(code, message = %self.message(), "internal error");
        }

        let mut metadata = Metadata::new(self.request_id());
        if let Some(failures) = failures {
            metadata = metadata.with_failures(failures);
        }

        let envelope = Envelope::<()> {
            success: false,
            data: None,
            error: Some(ErrorDetail {
                code: code.to_string(),
                message: self.message(),
            }),
            metadata,
        };

        let mut response = (status, Json(envelope)).into_response();
        response
            .headers_mut()
            .insert("X-Error-Code", code.parse().expect("ascii error code"));
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}
