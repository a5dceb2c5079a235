//! Response cache with per-category TTLs.
//!
//! The cache is an injected dependency: the [`Gateway`](crate::Gateway) owns a
//! [`ResponseCache`] built once at process start from a [`CacheTtlTable`].
//! Entries are whole-value replaced, never merged, and expired entries are
//! removed lazily on read or by [`ResponseCache::purge_expired`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Volatility class of a cached response. Each category has its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    /// Search volume, difficulty, CPC. Changes slowly.
    KeywordMetadata,
    /// Rankings and SERP features. Volatile.
    Serp,
    /// Research snippets gathered for drafting.
    Research,
    #[default]
    Generic,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 4] = [
        CacheCategory::KeywordMetadata,
        CacheCategory::Serp,
        CacheCategory::Research,
        CacheCategory::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::KeywordMetadata => "keyword_metadata",
            CacheCategory::Serp => "serp",
            CacheCategory::Research => "research",
            CacheCategory::Generic => "generic",
        }
    }
}

/// Category → TTL mapping.
#[derive(Debug, Clone)]
pub struct CacheTtlTable {
    ttls: HashMap<CacheCategory, Duration>,
}

impl Default for CacheTtlTable {
    fn default() -> Self {
        let mut ttls = HashMap::new();
        ttls.insert(CacheCategory::KeywordMetadata, Duration::from_secs(7 * 24 * 3600));
        ttls.insert(CacheCategory::Serp, Duration::from_secs(6 * 3600));
        ttls.insert(CacheCategory::Research, Duration::from_secs(24 * 3600));
        ttls.insert(CacheCategory::Generic, Duration::from_secs(3600));
        Self { ttls }
    }
}

impl CacheTtlTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the TTL for one category.
    pub fn with_ttl(mut self, category: CacheCategory, ttl: Duration) -> Self {
        self.ttls.insert(category, ttl);
        self
    }

    pub fn ttl(&self, category: CacheCategory) -> Duration {
        self.ttls
            .get(&category)
            .copied()
            .unwrap_or_else(|| Duration::from_secs(3600))
    }
}

/// Deterministic cache key: operation name plus a digest of the normalized
/// arguments with object keys sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(operation: &str, arguments: &Value) -> Self {
        let mut canonical = String::new();
        write_canonical(arguments, &mut canonical);
        let digest = Sha256::digest(canonical.as_bytes());
        Self(format!("{}:{}", operation, hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// A stored value with its absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Backing store for cache entries.
///
/// Implementations must tolerate concurrent access to the same key;
/// last writer wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<CacheEntry>;

    async fn put(&self, entry: CacheEntry);

    async fn remove(&self, key: &str);

    /// Remove `key` only if its entry has expired at `now`.
    ///
    /// A fresh entry written concurrently by another task survives.
    async fn remove_if_expired(&self, key: &str, now: Instant) -> bool;

    /// Drop every entry expired at `now`; returns how many were dropped.
    async fn purge_expired(&self, now: Instant) -> usize;

    async fn len(&self) -> usize;
}

/// In-process cache store.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, entry: CacheEntry) {
        self.entries.write().await.insert(entry.key.clone(), entry);
    }

    async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn remove_if_expired(&self, key: &str, now: Instant) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if !entry.is_live(now) => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    async fn purge_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL-aware cache front end. Cheap to clone.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttls: Arc<CacheTtlTable>,
    stats: Arc<CacheStats>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, ttls: CacheTtlTable) -> Self {
        Self {
            store,
            ttls: Arc::new(ttls),
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Cache backed by a [`MemoryCacheStore`].
    pub fn in_memory(ttls: CacheTtlTable) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), ttls)
    }

    /// Returns the value for `key` if it has not expired.
    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        match self.store.get(key.as_str()).await {
            Some(entry) if entry.is_live(now) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            Some(_) => {
                self.store.remove_if_expired(key.as_str(), now).await;
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` with the TTL configured for `category`.
    pub async fn put(&self, key: &CacheKey, value: Value, category: CacheCategory) {
        let ttl = self.ttls.ttl(category);
        self.store
            .put(CacheEntry {
                key: key.as_str().to_string(),
                value,
                expires_at: Instant::now() + ttl,
            })
            .await;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(key = %key, category = category.as_str(), ttl_secs = ttl.as_secs(), "cache write");
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.store.remove(key.as_str()).await;
    }

    pub async fn purge_expired(&self) -> usize {
        self.store.purge_expired(Instant::now()).await
    }

    pub async fn len(&self) -> usize {
        self.store.len().await
    }

    pub fn ttl_for(&self, category: CacheCategory) -> Duration {
        self.ttls.ttl(category)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
        }
    }
}
