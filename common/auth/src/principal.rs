use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap};

use crate::api_key::ApiKeyRegistry;
use crate::claims::{Claims, PrincipalKind};
use crate::codec::JwtCodec;
use crate::error::{AuthError, AuthResult};

/// Marks which `PrincipalKind` a handler requires, as a type parameter on
/// `Principal<K>` so the requirement is checked once at the extractor and
/// the handler signature documents it.
pub trait RequiredKind {
    const KIND: Option<PrincipalKind>;
}

/// No requirement: any authenticated caller, frontend or place-backend.
pub struct AnyKind;
impl RequiredKind for AnyKind {
    const KIND: Option<PrincipalKind> = None;
}

pub struct FrontendOnly;
impl RequiredKind for FrontendOnly {
    const KIND: Option<PrincipalKind> = Some(PrincipalKind::Frontend);
}

pub struct PlaceBackendOnly;
impl RequiredKind for PlaceBackendOnly {
    const KIND: Option<PrincipalKind> = Some(PrincipalKind::PlaceBackend);
}

/// Try Bearer-JWT first, then `X-API-Key`, yielding verified or synthetic
/// `Claims`: attempt JWT verification; if absent, attempt API-key lookup;
/// if both absent or both fail, the request is unauthenticated.
pub fn authenticate(
    jwt: &JwtCodec,
    api_keys: &ApiKeyRegistry,
    headers: &HeaderMap,
    required_kind: Option<PrincipalKind>,
) -> AuthResult<Claims> {
    if let Some(token) = bearer_token(headers)? {
        return jwt.verify(&token, required_kind);
    }

    if let Some(key) = headers
        .get("x-api-key")
        .map(|v| v.to_str().map_err(|_| AuthError::MalformedHeader))
        .transpose()?
    {
        let kind = api_keys.kind_for(key).ok_or(AuthError::UnknownApiKey)?;
        if let Some(required) = required_kind {
            if kind != required {
                return Err(AuthError::WrongKind);
            }
        }
        return Ok(Claims::synthetic(kind, jwt.config().issuer.clone()));
    }

    Err(AuthError::MissingCredential)
}

/// `Ok(None)` when there is no `Authorization` header at all, so the caller
/// can fall through to the API-key check. `Err` when the header is present
/// but not a well-formed `Bearer <token>` value.
fn bearer_token(headers: &HeaderMap) -> AuthResult<Option<String>> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let raw = value.to_str().map_err(|_| AuthError::MalformedHeader)?.trim();
    let token = raw
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MalformedHeader)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(Some(token.to_owned()))
}

/// Axum extractor establishing the caller's identity per the security
/// middleware's authentication stage. `K` fixes the kind a handler
/// requires; `Principal<AnyKind>` accepts either.
#[derive(Debug, Clone)]
pub struct Principal<K = AnyKind> {
    pub claims: Claims,
    _marker: PhantomData<K>,
}

impl<K> Principal<K> {
    pub fn into_claims(self) -> Claims {
        self.claims
    }
}

#[async_trait]
impl<S, K> FromRequestParts<S> for Principal<K>
where
    Arc<JwtCodec>: FromRef<S>,
    Arc<ApiKeyRegistry>: FromRef<S>,
    S: Send + Sync,
    K: RequiredKind + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jwt = Arc::<JwtCodec>::from_ref(state);
        let api_keys = Arc::<ApiKeyRegistry>::from_ref(state);
        let claims = authenticate(&jwt, &api_keys, &parts.headers, K::KIND)?;
        Ok(Self {
            claims,
            _marker: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use axum::http::HeaderValue;

    fn codec() -> JwtCodec {
        JwtCodec::new(JwtConfig::new("gateway-1", vec![9u8; 32]).unwrap())
    }

    #[test]
    fn bearer_token_parses_well_formed_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), Some("abc.def.ghi".to_owned()));
    }

    #[test]
    fn bearer_token_rejects_missing_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("abc.def.ghi"));
        assert!(matches!(bearer_token(&headers), Err(AuthError::MalformedHeader)));
    }

    #[test]
    fn authenticate_falls_back_to_api_key() {
        let codec = codec();
        let keys = ApiKeyRegistry::single("secret-key", PrincipalKind::PlaceBackend);
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("secret-key"));
        let claims = authenticate(&codec, &keys, &headers, None).unwrap();
        assert_eq!(claims.kind, PrincipalKind::PlaceBackend);
        assert_eq!(claims.issued_at, claims.expires_at);
    }

    #[test]
    fn authenticate_rejects_unknown_api_key() {
        let codec = codec();
        let keys = ApiKeyRegistry::single("secret-key", PrincipalKind::PlaceBackend);
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("wrong-key"));
        let err = authenticate(&codec, &keys, &headers, None).unwrap_err();
        assert!(matches!(err, AuthError::UnknownApiKey));
    }

    #[test]
    fn authenticate_rejects_wrong_kind_for_api_key() {
        let codec = codec();
        let keys = ApiKeyRegistry::single("secret-key", PrincipalKind::Frontend);
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("secret-key"));
        let err =
            authenticate(&codec, &keys, &headers, Some(PrincipalKind::PlaceBackend)).unwrap_err();
        assert!(matches!(err, AuthError::WrongKind));
    }

    #[test]
    fn authenticate_requires_some_credential() {
        let codec = codec();
        let keys = ApiKeyRegistry::default();
        let headers = HeaderMap::new();
        let err = authenticate(&codec, &keys, &headers, None).unwrap_err();
        assert!(matches!(err, AuthError::MissingCredential));
    }
}
