//! Response cache
//!
//! Content-addressed, salted, in-process LRU cache for model responses.
//!
//! The key is a SHA-256 over a canonical JSON document containing the cache
//! version, the salt, the session id, the route label (agent plus help level),
//! the prompt and the request context. `serde_json` object maps are ordered, so
//! the encoding is stable regardless of the caller's key order. The session id
//! is always part of the key: two students never share an entry.
//!
//! Expiry is lazy. An entry older than its TTL is dropped when read.
//!
//! The cache lives in one process. Horizontally scaled workers each keep their
//! own copy; a hit on one worker says nothing about another.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::{CacheConfig, Environment};
use sdk::errors::PipelineError;

/// Inputs that identify one cacheable response
#[derive(Debug, Clone, Copy)]
pub struct CacheKeyParts<'a> {
    pub session_id: &'a str,
    /// Route label of the composing agent, e.g. `tutor:guided:medium`
    pub mode: &'a str,
    pub prompt: &'a str,
    pub context: Option<&'a Value>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Hit/miss counters since construction (or the last `clear`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct ResponseCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    salt: String,
    version: String,
    ttl: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Build the cache from configuration
    ///
    /// # Errors
    ///
    /// `PipelineError::Config` when no salt is configured in production, or
    /// when `max_entries` is zero.
    pub fn new(config: &CacheConfig, environment: Environment) -> Result<Self, PipelineError> {
        let salt = match config.effective_salt() {
            Some(salt) => salt.to_string(),
            None if config.requires_salt(environment) => {
                return Err(PipelineError::Config(
                    "cache salt is required in production".to_string(),
                ));
            }
            None => {
                tracing::warn!(
                    "No cache salt configured, cache keys are predictable (environment: {})",
                    environment
                );
                String::new()
            }
        };

        let capacity = NonZeroUsize::new(config.max_entries).ok_or_else(|| {
            PipelineError::Config("cache.max_entries must be greater than 0".to_string())
        })?;

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            salt,
            version: config.version.clone(),
            ttl: config.ttl(),
            enabled: config.enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Hex SHA-256 key for the given parts
    pub fn key(&self, parts: &CacheKeyParts<'_>) -> String {
        let canonical = json!({
            "cache_version": self.version,
            "context": parts.context.cloned().unwrap_or(Value::Null),
            "mode": parts.mode,
            "prompt": parts.prompt,
            "salt": self.salt,
            "session_id": parts.session_id,
        });

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up a response; expired entries count as misses and are dropped
    pub fn get(&self, parts: &CacheKeyParts<'_>) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let key = self.key(parts);

        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Response cache lock poisoned, clearing cache");
                let mut guard = poisoned.into_inner();
                guard.clear();
                self.entries.clear_poison();
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let result = match entries.get(&key) {
            Some(entry) if entry.is_expired() => {
                entries.pop(&key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        };

        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cache hit for session {}", parts.session_id);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Store a generated response
    ///
    /// Callers must not store fallback text.
    pub fn set(&self, parts: &CacheKeyParts<'_>, value: impl Into<String>) {
        if !self.enabled {
            return;
        }
        let key = self.key(parts);
        let entry = CacheEntry {
            value: value.into(),
            created_at: Instant::now(),
            ttl: self.ttl,
        };

        match self.entries.lock() {
            Ok(mut entries) => {
                entries.put(key, entry);
            }
            Err(poisoned) => {
                tracing::error!("Response cache lock poisoned, clearing cache");
                poisoned.into_inner().clear();
                self.entries.clear_poison();
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let entries = match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(_) => 0,
        };
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }

    /// Drop every entry and reset counters
    pub fn clear(&self) {
        match self.entries.lock() {
            Ok(mut entries) => entries.clear(),
            Err(poisoned) => {
                poisoned.into_inner().clear();
                self.entries.clear_poison();
            }
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_entries: usize, ttl_secs: u64) -> CacheConfig {
        CacheConfig {
            max_entries,
            ttl_secs,
            salt: Some("test-salt".to_string()),
            ..Default::default()
        }
    }

    fn parts<'a>(session_id: &'a str, prompt: &'a str) -> CacheKeyParts<'a> {
        CacheKeyParts {
            session_id,
            mode: "tutor:socratic",
            prompt,
            context: None,
        }
    }

    #[test]
    fn test_production_requires_salt() {
        let cfg = CacheConfig {
            salt: None,
            ..Default::default()
        };
        let err = ResponseCache::new(&cfg, Environment::Production).err().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));

        assert!(ResponseCache::new(&cfg, Environment::Development).is_ok());
    }

    #[test]
    fn test_blank_salt_counts_as_missing() {
        let mut cfg = config(10, 60);
        cfg.salt = Some("   ".to_string());
        assert!(ResponseCache::new(&cfg, Environment::Production).is_err());

        // A disabled cache never keys anything, so production does not need a salt
        cfg.enabled = false;
        assert!(ResponseCache::new(&cfg, Environment::Production).is_ok());
    }

    #[test]
    fn test_concurrent_access_is_consistent() {
        let cache = std::sync::Arc::new(
            ResponseCache::new(&config(16, 60), Environment::Development).unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let session = format!("s{}", (worker + i) % 3);
                        let prompt = format!("p{}", i % 24);
                        let expected = format!("{}/{}", session, prompt);
                        if i % 2 == 0 {
                            cache.set(&parts(&session, &prompt), expected);
                        } else if let Some(value) = cache.get(&parts(&session, &prompt)) {
                            assert_eq!(value, expected);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.entries <= 16);
        assert_eq!(stats.hits + stats.misses, 8 * 250);
    }

    #[test]
    fn test_hit_after_set() {
        let cache = ResponseCache::new(&config(10, 60), Environment::Development).unwrap();
        assert_eq!(cache.get(&parts("s1", "¿qué es una pila?")), None);

        cache.set(&parts("s1", "¿qué es una pila?"), "Una pila es...");
        assert_eq!(
            cache.get(&parts("s1", "¿qué es una pila?")).as_deref(),
            Some("Una pila es...")
        );

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let cache = ResponseCache::new(&config(10, 60), Environment::Development).unwrap();
        cache.set(&parts("s1", "hola"), "respuesta");

        assert!(cache.get(&parts("s2", "hola")).is_none());
        assert_ne!(cache.key(&parts("s1", "hola")), cache.key(&parts("s2", "hola")));
    }

    #[test]
    fn test_context_key_order_is_irrelevant() {
        let cache = ResponseCache::new(&config(10, 60), Environment::Development).unwrap();
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();

        let ka = cache.key(&CacheKeyParts {
            context: Some(&a),
            ..parts("s1", "p")
        });
        let kb = cache.key(&CacheKeyParts {
            context: Some(&b),
            ..parts("s1", "p")
        });
        assert_eq!(ka, kb);
        assert_eq!(ka.len(), 64);
    }

    #[test]
    fn test_salt_changes_key() {
        let a = ResponseCache::new(&config(10, 60), Environment::Development).unwrap();
        let mut other = config(10, 60);
        other.salt = Some("another".to_string());
        let b = ResponseCache::new(&other, Environment::Development).unwrap();

        assert_ne!(a.key(&parts("s1", "p")), b.key(&parts("s1", "p")));
    }

    #[test]
    fn test_expired_entry_is_miss() {
        let cache = ResponseCache::new(&config(10, 0), Environment::Development).unwrap();
        cache.set(&parts("s1", "p"), "v");
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get(&parts("s1", "p")).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ResponseCache::new(&config(2, 60), Environment::Development).unwrap();
        cache.set(&parts("s1", "a"), "1");
        cache.set(&parts("s1", "b"), "2");
        // Touch "a" so "b" becomes least recently used
        assert!(cache.get(&parts("s1", "a")).is_some());
        cache.set(&parts("s1", "c"), "3");

        assert!(cache.get(&parts("s1", "a")).is_some());
        assert!(cache.get(&parts("s1", "b")).is_none());
        assert!(cache.get(&parts("s1", "c")).is_some());
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let mut cfg = config(10, 60);
        cfg.enabled = false;
        let cache = ResponseCache::new(&cfg, Environment::Development).unwrap();
        cache.set(&parts("s1", "p"), "v");
        assert!(cache.get(&parts("s1", "p")).is_none());
    }

    #[test]
    fn test_clear_resets() {
        let cache = ResponseCache::new(&config(10, 60), Environment::Development).unwrap();
        cache.set(&parts("s1", "p"), "v");
        cache.get(&parts("s1", "p"));
        cache.clear();

        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 0,
                misses: 0,
                entries: 0
            }
        );
    }
}
