//! Process-lifetime caches for challenges and tokens. Default singletons are
//! acceptable, but every cache sits behind a trait object so callers can
//! substitute a discarding implementation for tests or stateless use.
//!
//! Deliberately no eviction: tokens stay cached past `issuedAt + expiresIn`
//! and it is the *consumer*'s job to check `Token::is_expired` before use, so
//! a stale-but-present entry can still be read back rather than silently
//! disappearing.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::auth::{Challenge, Token};

/// Keyed by registry host. Concurrent map, no eviction.
pub trait ChallengeCache: Send + Sync {
    fn get(&self, host: &str) -> Option<Challenge>;
    fn put(&self, host: &str, challenge: Challenge);
}

/// Keyed by `host + canonical scope string`. Consumers must check
/// `Token::is_expired` before use.
pub trait TokenCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Token>;
    fn put(&self, key: &str, token: Token);
}

/// In-process `RwLock<HashMap<..>>`, last-writer-wins, no eviction.
#[derive(Default)]
pub struct InMemoryChallengeCache {
    entries: RwLock<HashMap<String, Challenge>>,
}

impl ChallengeCache for InMemoryChallengeCache {
    fn get(&self, host: &str) -> Option<Challenge> {
        self.entries.read().unwrap().get(host).cloned()
    }

    fn put(&self, host: &str, challenge: Challenge) {
        debug!("caching challenge for host {host:?}: {:?}", challenge.scheme);
        self.entries.write().unwrap().insert(host.to_string(), challenge);
    }
}

#[derive(Default)]
pub struct InMemoryTokenCache {
    entries: RwLock<HashMap<String, (Token, DateTime<Utc>)>>,
}

impl TokenCache for InMemoryTokenCache {
    fn get(&self, key: &str) -> Option<Token> {
        self.entries.read().unwrap().get(key).map(|(t, _)| t.clone())
    }

    fn put(&self, key: &str, token: Token) {
        debug!("caching token for key {key:?}, expires_in={}", token.expires_in);
        let issued = token.issued_at;
        self.entries.write().unwrap().insert(key.to_string(), (token, issued));
    }
}

/// Substituted in tests and for stateless/one-shot use.
pub struct DiscardCache;

impl ChallengeCache for DiscardCache {
    fn get(&self, _host: &str) -> Option<Challenge> {
        None
    }

    fn put(&self, _host: &str, _challenge: Challenge) {}
}

impl TokenCache for DiscardCache {
    fn get(&self, _key: &str) -> Option<Token> {
        None
    }

    fn put(&self, _key: &str, _token: Token) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ChallengeScheme;
    use std::collections::HashMap as StdHashMap;

    #[test]
    fn in_memory_challenge_cache_round_trips() {
        let cache = InMemoryChallengeCache::default();
        assert!(cache.get("registry.example.com").is_none());

        let challenge = Challenge { scheme: ChallengeScheme::Bearer, parameters: Some(StdHashMap::new()) };
        cache.put("registry.example.com", challenge.clone());
        assert_eq!(cache.get("registry.example.com"), Some(challenge));
    }

    #[test]
    fn discard_cache_never_retains() {
        let cache = DiscardCache;
        let challenge = Challenge { scheme: ChallengeScheme::Basic, parameters: None };
        cache.put("host", challenge);
        assert!(cache.get("host").is_none());
    }
}
