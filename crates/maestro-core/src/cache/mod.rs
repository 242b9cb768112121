//! Response caching
//!
//! In-memory LRU cache for completed responses. Keys are derived from the
//! normalized conversation plus the model id, so trivial formatting
//! differences still hit. Entries expire after a cache-level TTL, checked on
//! contact and swept periodically in the background.

use crate::types::{Message, Response};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether response caching is active at all
    pub enabled: bool,
    /// Maximum number of cached responses
    pub capacity: usize,
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
    /// How often the background sweep evicts expired entries, in seconds
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 100,
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> crate::error::MaestroResult<()> {
        if self.capacity == 0 {
            return Err(crate::error::MaestroError::config(
                "cache capacity must be at least 1",
            ));
        }
        if self.ttl_secs == 0 {
            return Err(crate::error::MaestroError::config(
                "cache ttl_secs must be at least 1",
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(crate::error::MaestroError::config(
                "cache sweep_interval_secs must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Key identifying one cacheable request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseKey {
    hash: u64,
}

impl ResponseKey {
    /// Build a key from the model and the conversation.
    ///
    /// Content is trimmed and lowercased before hashing so whitespace and
    /// casing differences do not fragment the cache. Roles and message order
    /// stay significant, as does the model id.
    pub fn new(model_id: &str, messages: &[Message]) -> Self {
        let mut hasher = DefaultHasher::new();
        model_id.hash(&mut hasher);
        for message in messages {
            message.role.as_str().hash(&mut hasher);
            message.content.trim().to_lowercase().hash(&mut hasher);
        }
        Self {
            hash: hasher.finish(),
        }
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}

/// Cache observability counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lifetime lookup hits
    pub hits: u64,
    /// Lifetime lookup misses
    pub misses: u64,
    /// Entries dropped by capacity pressure, expiry, or sweeps
    pub evictions: u64,
    /// Entries currently held
    pub size: usize,
    /// hits / (hits + misses), 0.0 before any lookup
    pub hit_rate: f64,
}

#[derive(Debug, Clone)]
struct CachedEntry {
    response: Response,
    stored_at: Instant,
}

impl CachedEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() > ttl
    }
}

/// LRU response cache with TTL expiry
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<LruCache<u64, CachedEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl())
    }

    /// Look up a previously cached response.
    ///
    /// Hits are returned with the cached marker set and zero latency. An
    /// expired entry is evicted on contact and counts as a miss.
    pub async fn get(&self, key: &ResponseKey) -> Option<Response> {
        let mut entries = self.entries.lock().await;
        match entries.get(&key.hash) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                let response = entry.response.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = key.hash, "response cache hit");
                Some(response.into_cached())
            }
            Some(_) => {
                entries.pop(&key.hash);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a completed response. Capacity overflow evicts the least
    /// recently used entry.
    pub async fn put(&self, key: ResponseKey, response: Response) {
        let entry = CachedEntry {
            response,
            stored_at: Instant::now(),
        };
        let mut entries = self.entries.lock().await;
        if let Some((evicted_hash, _)) = entries.push(key.hash, entry) {
            if evicted_hash != key.hash {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drop all entries. Lifetime hit and miss counters are kept.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Evict every expired entry, returning how many were removed
    pub async fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let expired: Vec<u64> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl))
            .map(|(hash, _)| *hash)
            .collect();
        for hash in &expired {
            entries.pop(hash);
        }
        if !expired.is_empty() {
            self.evictions.fetch_add(expired.len() as u64, Ordering::Relaxed);
            tracing::debug!(evicted = expired.len(), "swept expired cache entries");
        }
        expired.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let size = self.entries.lock().await.len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            size,
            hit_rate,
        }
    }
}

/// Periodically sweep expired entries until the handle is aborted
pub fn spawn_sweeper(cache: Arc<ResponseCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately, skip it
        ticker.tick().await;
        loop {
            ticker.tick().await;
            cache.sweep_expired().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenUsage;

    fn sample_response(content: &str) -> Response {
        Response {
            content: content.to_string(),
            model_id: "test-model".to_string(),
            provider_id: "test-provider".to_string(),
            usage: TokenUsage::new(10, 20),
            latency_ms: 150,
            cached: false,
            complete: true,
            finish_reason: Some("stop".to_string()),
        }
    }

    #[test]
    fn test_key_ignores_whitespace_and_case() {
        let a = ResponseKey::new(
            "gpt-4",
            &[Message::user("  What is Rust?  "), Message::assistant("A language.")],
        );
        let b = ResponseKey::new(
            "gpt-4",
            &[Message::user("what is rust?"), Message::assistant("a language.")],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_varies_with_model_role_and_order() {
        let history = [Message::user("hello"), Message::assistant("hi")];
        let base = ResponseKey::new("gpt-4", &history);

        assert_ne!(base, ResponseKey::new("claude-3", &history));

        let swapped_roles = [Message::assistant("hello"), Message::user("hi")];
        assert_ne!(base, ResponseKey::new("gpt-4", &swapped_roles));

        let reordered = [Message::assistant("hi"), Message::user("hello")];
        assert_ne!(base, ResponseKey::new("gpt-4", &reordered));
    }

    #[tokio::test]
    async fn test_hit_returns_cached_marker() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        let key = ResponseKey::new("gpt-4", &[Message::user("hello")]);
        cache.put(key, sample_response("hi there")).await;

        let hit = cache.get(&key).await.unwrap();
        assert!(hit.cached);
        assert_eq!(hit.latency_ms, 0);
        assert_eq!(hit.content, "hi there");

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_miss_is_counted() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        let key = ResponseKey::new("gpt-4", &[Message::user("unseen")]);
        assert!(cache.get(&key).await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = ResponseCache::new(10, Duration::from_millis(10));
        let key = ResponseKey::new("gpt-4", &[Message::user("hello")]);
        cache.put(key, sample_response("hi")).await;

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.get(&key).await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        let first = ResponseKey::new("m", &[Message::user("one")]);
        let second = ResponseKey::new("m", &[Message::user("two")]);
        let third = ResponseKey::new("m", &[Message::user("three")]);

        cache.put(first, sample_response("1")).await;
        cache.put(second, sample_response("2")).await;
        // Touch the first so the second becomes the eviction candidate
        assert!(cache.get(&first).await.is_some());
        cache.put(third, sample_response("3")).await;

        assert!(cache.get(&second).await.is_none());
        assert!(cache.get(&first).await.is_some());
        assert!(cache.get(&third).await.is_some());
        let stats = cache.stats().await;
        assert_eq!(stats.size, 2);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let cache = ResponseCache::new(10, Duration::from_millis(30));
        let old = ResponseKey::new("m", &[Message::user("old")]);
        cache.put(old, sample_response("old")).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let fresh = ResponseKey::new("m", &[Message::user("fresh")]);
        cache.put(fresh, sample_response("fresh")).await;

        assert_eq!(cache.sweep_expired().await, 1);
        let stats = cache.stats().await;
        assert_eq!(stats.size, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_hit_rate() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        let key = ResponseKey::new("m", &[Message::user("q")]);
        cache.put(key, sample_response("a")).await;

        assert!(cache.get(&key).await.is_some());
        assert!(cache.get(&key).await.is_some());
        assert!(
            cache
                .get(&ResponseKey::new("m", &[Message::user("other")]))
                .await
                .is_none()
        );

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig::default().validate().is_ok());
        let bad = CacheConfig {
            capacity: 0,
            ..CacheConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
