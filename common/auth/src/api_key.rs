use std::collections::HashMap;
use std::sync::Arc;

use crate::claims::PrincipalKind;

/// The set of API keys a service will accept on `X-API-Key`, each tagged
/// with the `PrincipalKind` it authenticates as.
///
/// A Location Service registers one key (its own `api_key`, class
/// `PlaceBackend`). The Gateway registers two: `frontend_api_key` (class
/// `Frontend`) and `place_backend_api_key` (class `PlaceBackend`, for
/// internal tooling per the `/auth/place/token` endpoint).
#[derive(Clone, Default)]
pub struct ApiKeyRegistry {
    keys: Arc<HashMap<String, PrincipalKind>>,
}

impl ApiKeyRegistry {
    pub fn new(entries: impl IntoIterator<Item = (String, PrincipalKind)>) -> Self {
        Self {
            keys: Arc::new(entries.into_iter().collect()),
        }
    }

    pub fn single(key: impl Into<String>, kind: PrincipalKind) -> Self {
        Self::new([(key.into(), kind)])
    }

    pub fn kind_for(&self, key: &str) -> Option<PrincipalKind> {
        self.keys.get(key).copied()
    }

    pub fn matches(&self, key: &str, expected_kind: PrincipalKind) -> bool {
        self.keys.get(key) == Some(&expected_kind)
    }
}
