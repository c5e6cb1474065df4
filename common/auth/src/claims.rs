use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// The two principal kinds the fleet knows about. `Frontend` is the
/// Dashboard talking to the Gateway;
/// `PlaceBackend` is the Gateway talking to a Location Service (or an
/// operator tool talking to either directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Frontend,
    PlaceBackend,
}

impl PrincipalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PrincipalKind::Frontend => "frontend",
            PrincipalKind::PlaceBackend => "place_backend",
        }
    }
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified JWT claims, or the synthetic claims stamped on an API-key
/// authenticated request. Either way, by the time a handler sees `Claims`
/// the caller is established.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub kind: PrincipalKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issuer: String,
}

impl Claims {
    /// Claims for an API-key authenticated caller: not JWT-backed, so
    /// `issued_at == expires_at` (an API key does not expire on its own).
    pub fn synthetic(kind: PrincipalKind, issuer: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            kind,
            issued_at: now,
            expires_at: now,
            issuer: issuer.into(),
        }
    }

    pub fn is_kind(&self, required: PrincipalKind) -> bool {
        self.kind == required
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct ClaimsRepr {
    pub(crate) kind: PrincipalKind,
    pub(crate) iat: i64,
    pub(crate) exp: i64,
    pub(crate) iss: String,
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let issued_at = Utc
            .timestamp_opt(value.iat, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidClaim("iat", value.iat.to_string()))?;
        let expires_at = Utc
            .timestamp_opt(value.exp, 0)
            .single()
            .ok_or_else(|| AuthError::InvalidClaim("exp", value.exp.to_string()))?;

        Ok(Self {
            kind: value.kind,
            issued_at,
            expires_at,
            issuer: value.iss,
        })
    }
}
