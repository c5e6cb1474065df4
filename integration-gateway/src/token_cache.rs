use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-Location JWT cache: a cached token is served as long as it has at
/// least [`MIN_REMAINING`] left, otherwise the caller mints a fresh one.
///
/// The cache stores a monotonic expiry (`Instant`) rather than the JWT's
/// own `exp` claim so refresh timing does not depend on clock skew between
/// the Gateway and whichever Location issued the token.
pub struct TokenCache {
    entries: Mutex<HashMap<String, CachedToken>>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// How much of a token's remaining lifetime must be left for it to still
/// be served from cache.
const MIN_REMAINING: Duration = Duration::from_secs(60);

impl TokenCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// A cached, still-fresh token for this Location, if any.
    pub fn get(&self, location_id: &str) -> Option<String> {
        let guard = self.entries.lock().expect("token cache mutex poisoned");
        guard.get(location_id).and_then(|entry| {
            if entry.expires_at.saturating_duration_since(Instant::now()) >= MIN_REMAINING {
                Some(entry.token.clone())
            } else {
                None
            }
        })
    }

    pub fn store(&self, location_id: &str, token: String, ttl: Duration) {
        let mut guard = self.entries.lock().expect("token cache mutex poisoned");
        guard.insert(
            location_id.to_string(),
            CachedToken {
                token,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Evict on a 401 from the downstream, so the next call mints a fresh
    /// token instead of retrying with the one that just got rejected.
    pub fn evict(&self, location_id: &str) {
        self.entries.lock().expect("token cache mutex poisoned").remove(location_id);
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_served_from_cache() {
        let cache = TokenCache::new();
        cache.store("loc-a", "token-1".to_string(), Duration::from_secs(3600));
        assert_eq!(cache.get("loc-a"), Some("token-1".to_string()));
    }

    #[test]
    fn token_with_less_than_60s_remaining_is_not_served() {
        let cache = TokenCache::new();
        cache.store("loc-a", "token-1".to_string(), Duration::from_secs(30));
        assert_eq!(cache.get("loc-a"), None);
    }

    #[test]
    fn eviction_removes_the_entry() {
        let cache = TokenCache::new();
        cache.store("loc-a", "token-1".to_string(), Duration::from_secs(3600));
        cache.evict("loc-a");
        assert_eq!(cache.get("loc-a"), None);
    }

    #[test]
    fn unknown_location_has_no_cached_token() {
        let cache = TokenCache::new();
        assert_eq!(cache.get("loc-z"), None);
    }
}
