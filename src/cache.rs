//! Response Cache
//!
//! Keyed lookup/store of prior provider responses with an in-memory backend
//! and an optional Redis backend (`caching` feature).
//!
//! Keys are derived from `(prompt, provider, model)` by [`cache_key`]; values
//! are JSON-encoded [`CachedResponse`]s.
//!
//! ## Usage
//!
//! ```no_run
//! use dwa_orchestrator::cache::{cache_key, MemoryCache, ResponseCache};
//! # #[tokio::main]
//! # async fn main() {
//! let cache = MemoryCache::new(1000);
//! let key = cache_key("hello", dwa_orchestrator::ProviderId::OpenAi, "gpt-4");
//!
//! if let Ok(Some(hit)) = cache.get(&key).await {
//!     println!("{hit}");
//! }
//! cache.set(&key, "serialized response", 3600).await;
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
#[cfg(feature = "caching")]
use tracing::warn;

use crate::config::CacheConfig;
use crate::provider::ProviderId;
use crate::OrchestratorError;

/// Prefix of every response cache key.
pub const KEY_PREFIX: &str = "llm_response";

/// Keyed response store.
///
/// Implementations must never block the caller on an outage: a failed read
/// is reported as an error for the caller to log and treat as a miss; a
/// failed write returns `false`.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Value stored under `key`, if present and not expired.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::CacheUnavailable`] when the backend
    /// cannot be reached.
    async fn get(&self, key: &str) -> Result<Option<String>, OrchestratorError>;

    /// Store `value` under `key` for `ttl_secs`. Returns whether it was stored.
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> bool;
}

/// What gets stored for one provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Response text.
    pub response: String,
    /// Provider that produced it.
    pub provider: ProviderId,
    /// Model it resolved to.
    pub model: String,
    /// Tokens used by the original call.
    pub tokens_used: f64,
    /// Latency of the original call, in seconds.
    pub response_time: f64,
    /// When it was written.
    pub cached_at: DateTime<Utc>,
}

/// Deterministic cache key for `(prompt, provider, model)`.
///
/// `llm_response:` followed by the first 16 hex digits of the SHA-256 of the
/// canonical (key-sorted) JSON encoding of the triple.
pub fn cache_key(prompt: &str, provider: ProviderId, model: &str) -> String {
    // serde_json::Map is ordered, so the encoding is canonical.
    let payload = serde_json::json!({
        "prompt": prompt,
        "provider": provider.as_str(),
        "model": model,
    });
    let digest = Sha256::digest(payload.to_string().as_bytes());
    let hex = format!("{digest:x}");
    format!("{KEY_PREFIX}:{}", &hex[..16])
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of entries currently held in the cache.
    pub entries: usize,
    /// Name of the storage backend in use (`"memory"` or `"redis"`).
    pub backend: String,
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
}

// ============================================================================
// Memory backend
// ============================================================================

struct CacheEntry {
    value: String,
    expires_at: SystemTime,
}

/// In-process TTL cache with a soft entry cap.
#[derive(Default)]
pub struct MemoryCache {
    store: DashMap<String, CacheEntry>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Cache holding at most `max_entries` entries (0 = unbounded).
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: DashMap::new(),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Remove `key`.
    pub fn delete(&self, key: &str) {
        self.store.remove(key);
        debug!(key = key, "deleted from cache (memory)");
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let before = self.store.len();
        self.store.retain(|k, _| !k.starts_with(prefix));
        let removed = before.saturating_sub(self.store.len());
        debug!(prefix = prefix, removed, "cleared keys (memory)");
        removed
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.store.clear();
        debug!("cleared memory cache");
    }

    /// Entry count and hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.store.len(),
            backend: "memory".to_string(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, OrchestratorError> {
        if let Some(entry) = self.store.get(key) {
            if entry.expires_at > SystemTime::now() {
                debug!(key = key, "cache hit (memory)");
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.store.remove(key);
            debug!(key = key, "cache expired");
        }
        debug!(key = key, "cache miss (memory)");
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        if self.max_entries > 0
            && self.store.len() >= self.max_entries
            && !self.store.contains_key(key)
        {
            // Collect the key first so no shard guard is held during remove.
            let evict = self.store.iter().next().map(|e| e.key().clone());
            if let Some(k) = evict {
                self.store.remove(&k);
            }
        }

        self.store.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: SystemTime::now() + Duration::from_secs(ttl_secs),
            },
        );
        debug!(key = key, ttl_secs = ttl_secs, "cached (memory)");
        true
    }
}

// ============================================================================
// Redis backend
// ============================================================================

/// Redis-backed cache.
#[cfg(feature = "caching")]
pub struct RedisCache {
    client: redis::Client,
}

#[cfg(feature = "caching")]
impl RedisCache {
    /// Connect and PING.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::CacheUnavailable`] if the URL is invalid
    /// or the server does not answer.
    pub async fn connect(redis_url: &str) -> Result<Self, OrchestratorError> {
        let client = redis::Client::open(redis_url).map_err(unavailable)?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(Self { client })
    }

    /// Remove `key`.
    pub async fn delete(&self, key: &str) -> bool {
        match self.delete_redis(key).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = key, error = ?e, "redis delete error");
                false
            }
        }
    }

    /// Remove every key matching the glob `pattern`. Returns how many were
    /// removed; 0 on error.
    pub async fn clear_pattern(&self, pattern: &str) -> usize {
        match self.clear_pattern_redis(pattern).await {
            Ok(n) => n,
            Err(e) => {
                warn!(pattern = pattern, error = ?e, "redis clear error");
                0
            }
        }
    }

    async fn delete_redis(&self, key: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("DEL").arg(key).query_async(&mut conn).await
    }

    async fn clear_pattern_redis(&self, pattern: &str) -> Result<usize, redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys: Vec<String> = redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        redis::cmd("DEL").arg(&keys).query_async(&mut conn).await
    }
}

#[cfg(feature = "caching")]
fn unavailable(e: redis::RedisError) -> OrchestratorError {
    OrchestratorError::CacheUnavailable(e.to_string())
}

#[cfg(feature = "caching")]
#[async_trait]
impl ResponseCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, OrchestratorError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        debug!(key = key, hit = value.is_some(), "cache lookup (redis)");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let result: Result<(), redis::RedisError> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_secs)
                .arg(value)
                .query_async(&mut conn)
                .await
        }
        .await;
        match result {
            Ok(()) => {
                debug!(key = key, ttl_secs = ttl_secs, "cached (redis)");
                true
            }
            Err(e) => {
                warn!(key = key, error = ?e, "redis set error");
                false
            }
        }
    }
}

/// Build the cache described by `config`, or `None` when caching is off.
///
/// With the `caching` feature and a `redis_url`, Redis is tried first; if it
/// cannot be reached the in-memory backend is used instead.
pub async fn build_cache(config: &CacheConfig) -> Option<Arc<dyn ResponseCache>> {
    if !config.enabled {
        return None;
    }
    if let Some(redis) = connect_redis(config).await {
        return Some(redis);
    }
    Some(Arc::new(MemoryCache::new(config.max_entries)))
}

#[cfg(feature = "caching")]
async fn connect_redis(config: &CacheConfig) -> Option<Arc<dyn ResponseCache>> {
    let url = config.redis_url.as_deref()?;
    match RedisCache::connect(url).await {
        Ok(redis) => {
            tracing::info!("response cache using redis");
            Some(Arc::new(redis))
        }
        Err(e) => {
            warn!(error = %e, "redis unreachable, falling back to memory cache");
            None
        }
    }
}

#[cfg(not(feature = "caching"))]
async fn connect_redis(config: &CacheConfig) -> Option<Arc<dyn ResponseCache>> {
    if config.redis_url.is_some() {
        debug!("redis_url ignored: built without the `caching` feature");
    }
    None
}
