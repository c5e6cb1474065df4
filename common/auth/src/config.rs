use crate::error::{AuthError, AuthResult};

/// Runtime configuration for HS256 JWT issuance and verification.
#[derive(Clone)]
pub struct JwtConfig {
    /// `iss` claim stamped on every token minted by this service.
    pub issuer: String,
    /// HS256 signing secret. Must be at least 32 bytes.
    secret: Vec<u8>,
    /// Allowable clock skew in seconds when validating `exp`.
    pub leeway_seconds: u32,
    /// TTL for `Frontend` tokens. Defaults to 1 hour.
    pub frontend_ttl_seconds: i64,
    /// TTL for `PlaceBackend` tokens. Defaults to 1 hour.
    pub place_backend_ttl_seconds: i64,
}

const MIN_SECRET_LEN: usize = 32;
const DEFAULT_LEEWAY_SECONDS: u32 = 30;
const DEFAULT_TTL_SECONDS: i64 = 3600;

impl JwtConfig {
    pub fn new(issuer: impl Into<String>, secret: impl Into<Vec<u8>>) -> AuthResult<Self> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::WeakSecret {
                actual: secret.len(),
                minimum: MIN_SECRET_LEN,
            });
        }
        Ok(Self {
            issuer: issuer.into(),
            secret,
            leeway_seconds: DEFAULT_LEEWAY_SECONDS,
            frontend_ttl_seconds: DEFAULT_TTL_SECONDS,
            place_backend_ttl_seconds: DEFAULT_TTL_SECONDS,
        })
    }

    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    pub fn with_frontend_ttl_seconds(mut self, seconds: i64) -> Self {
        self.frontend_ttl_seconds = seconds;
        self
    }

    pub fn with_place_backend_ttl_seconds(mut self, seconds: i64) -> Self {
        self.place_backend_ttl_seconds = seconds;
        self
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("issuer", &self.issuer)
            .field("secret", &"***redacted***")
            .field("leeway_seconds", &self.leeway_seconds)
            .field("frontend_ttl_seconds", &self.frontend_ttl_seconds)
            .field("place_backend_ttl_seconds", &self.place_backend_ttl_seconds)
            .finish()
    }
}
