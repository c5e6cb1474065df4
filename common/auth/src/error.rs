use axum::response::{IntoResponse, Response};
use common_http_errors::ApiError;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Internal, typed reasons authentication can fail. Everything except "no
/// credential at all" collapses to the identical `AUTH_INVALID` response
/// at the HTTP boundary - the caller never learns which of bad key / bad
/// signature / expired token / wrong kind occurred.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no Authorization header or X-API-Key present")]
    MissingCredential,
    #[error("authorization header malformed")]
    MalformedHeader,
    #[error("token signature verification failed: {0}")]
    BadSignature(String),
    #[error("token is expired or not yet valid")]
    Expired,
    #[error("token kind does not match what this endpoint requires")]
    WrongKind,
    #[error("presented API key is not recognized")]
    UnknownApiKey,
    #[error("malformed claim payload: {0}")]
    InvalidJson(String),
    #[error("invalid claim '{0}' with value '{1}'")]
    InvalidClaim(&'static str, String),
    #[error("configured signing secret is too weak: {actual} bytes, need >= {minimum}")]
    WeakSecret { actual: usize, minimum: usize },
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match value.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::BadSignature(value.to_string()),
            _ => AuthError::BadSignature(value.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::MissingCredential => ApiError::AuthRequired { request_id: None },
            AuthError::WeakSecret { .. } => ApiError::Internal {
                request_id: None,
                message: value.to_string(),
            },
            _ => ApiError::AuthInvalid { request_id: None },
        }
    }
}

/// Lets `Principal<K>` be used directly as an axum extractor: a failed
/// extraction turns into the same response shape a handler-level auth
/// rejection would produce.
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
