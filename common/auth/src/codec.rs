use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

use crate::claims::{Claims, ClaimsRepr, PrincipalKind};
use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};

/// A minted token plus the TTL the caller should report as `expires_in`.
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: i64,
}

/// HS256 issuer/verifier for the fleet's `kind`-tagged JWTs.
///
/// One `JwtCodec` per service, built from that service's own `JwtConfig`
/// (its own secret, its own issuer name) - there is no shared signing key
/// across tiers; every JWT verifies only against its own issuer's key.
#[derive(Clone)]
pub struct JwtCodec {
    config: JwtConfig,
}

impl JwtCodec {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Mint a token for the given principal kind, TTL taken from config
    /// (`frontend_ttl_seconds` / `place_backend_ttl_seconds`).
    pub fn issue(&self, kind: PrincipalKind) -> AuthResult<IssuedToken> {
        let ttl = match kind {
            PrincipalKind::Frontend => self.config.frontend_ttl_seconds,
            PrincipalKind::PlaceBackend => self.config.place_backend_ttl_seconds,
        };
        let now = Utc::now().timestamp();
        let claims = ClaimsRepr {
            kind,
            iat: now,
            exp: now + ttl,
            iss: self.config.issuer.clone(),
        };
        let token = encode(
            &Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.secret()),
        )
        .map_err(AuthError::from)?;
        Ok(IssuedToken {
            access_token: token,
            expires_in: ttl,
        })
    }

    /// Verify a bearer token and return its claims iff the signature is
    /// valid, it is unexpired within clock skew, the issuer matches, and
    /// (when `required_kind` is given) its `kind` matches.
    pub fn verify(&self, token: &str, required_kind: Option<PrincipalKind>) -> AuthResult<Claims> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.leeway = self.config.leeway_seconds.into();

        let token_data = decode::<ClaimsRepr>(
            token,
            &DecodingKey::from_secret(self.config.secret()),
            &validation,
        )
        .map_err(AuthError::from)?;

        let claims = Claims::try_from(token_data.claims)?;

        if let Some(required) = required_kind {
            if !claims.is_kind(required) {
                return Err(AuthError::WrongKind);
            }
        }

        debug!(kind = %claims.kind, "verified JWT successfully");
        Ok(claims)
    }
}
