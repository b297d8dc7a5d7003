//! Response cache: three independent TTL + size-bounded-LRU key families.
//!
//! - search results, coarsely invalidated per kind on every insert
//! - upload-dedup (content hash -> download code), TTL-bounded only
//! - download responses (code -> record), TTL-bounded only
//!
//! The dedup and download families are never invalidated by writes: a
//! content hash uniquely determines its record, so entries cannot go
//! stale. Entries are charged by serialized size against a global byte
//! budget; eviction under pressure is least-recently-used, independent of
//! TTL expiry.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use serde_json::Value;

use crate::database::EntityKind;

/// Default fraction of total system memory granted to the cache.
const MEMORY_BUDGET_DIVISOR: u64 = 3;
/// Floor for pathological environments where memory cannot be probed.
const MIN_MEMORY_BUDGET: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Total byte budget across all families. `None` uses a third of the
    /// system's total memory.
    pub memory_budget: Option<u64>,
    pub search_ttl: Duration,
    pub dedup_ttl: Duration,
    pub download_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget: None,
            search_ttl: Duration::from_secs(10 * 60),
            dedup_ttl: Duration::from_secs(5 * 60),
            download_ttl: Duration::from_secs(30 * 60),
        }
    }
}

fn system_memory_budget() -> u64 {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    (system.total_memory() / MEMORY_BUDGET_DIVISOR).max(MIN_MEMORY_BUDGET)
}

/// Serialization-size heuristic used to charge JSON entries.
fn json_cost(value: &Arc<Value>) -> u32 {
    serde_json::to_vec(value.as_ref())
        .map(|bytes| bytes.len() as u32)
        .unwrap_or(u32::MAX)
}

fn str_cost(value: &String) -> u32 {
    value.len() as u32
}

/// TTL + size-bounded-LRU cache over string keys, with a pluggable cost
/// function charged against a byte budget.
struct CostedCache<V: Clone + Send + Sync + 'static> {
    inner: Cache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> CostedCache<V> {
    fn new(max_bytes: u64, ttl: Duration, cost: fn(&V) -> u32) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_bytes)
                .weigher(move |_key: &String, value: &V| cost(value).max(1))
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build(),
        }
    }

    fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key)
    }

    fn insert(&self, key: String, value: V) {
        self.inner.insert(key, value);
    }

    /// Drop every entry under a key prefix. Entries are removed lazily by
    /// moka, so this never blocks the caller; reads see the invalidation
    /// immediately.
    fn invalidate_prefix(&self, prefix: String) {
        if let Err(e) = self
            .inner
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
        {
            tracing::warn!("cache invalidation predicate rejected: {}", e);
        }
    }
}

pub struct ResponseCache {
    search: CostedCache<Arc<Value>>,
    dedup: CostedCache<String>,
    download: CostedCache<Arc<Value>>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let budget = config.memory_budget.unwrap_or_else(system_memory_budget);
        let per_family = budget / 3;
        tracing::debug!(budget, "response cache memory budget");

        Self {
            search: CostedCache::new(per_family, config.search_ttl, json_cost),
            dedup: CostedCache::new(per_family, config.dedup_ttl, str_cost),
            download: CostedCache::new(per_family, config.download_ttl, json_cost),
        }
    }

    // search family

    pub fn search_key(kind: EntityKind, page: u32, amount: u32, body_digest: &str) -> String {
        format!("{}:{}:{}:{}", kind.cache_ns(), page, amount, body_digest)
    }

    pub fn get_search(&self, key: &str) -> Option<Arc<Value>> {
        self.search.get(key)
    }

    pub fn put_search(&self, key: String, value: Arc<Value>) {
        self.search.insert(key, value);
    }

    /// Coarse invalidation: drops the whole `kind` namespace of the search
    /// family. Dedup and download entries are untouched.
    pub fn invalidate_search(&self, kind: EntityKind) {
        self.search
            .invalidate_prefix(format!("{}:", kind.cache_ns()));
    }

    // upload-dedup family

    pub fn dedup_key(kind: EntityKind, content_hash: &str) -> String {
        format!("{}:{}", kind.cache_ns(), content_hash)
    }

    pub fn get_code(&self, key: &str) -> Option<String> {
        self.dedup.get(key)
    }

    pub fn put_code(&self, key: String, code: String) {
        self.dedup.insert(key, code);
    }

    // download family

    pub fn download_key(kind: EntityKind, code: &str, download: bool) -> String {
        format!("{}:{}:{}", kind.cache_ns(), code, download)
    }

    pub fn get_download(&self, key: &str) -> Option<Arc<Value>> {
        self.download.get(key)
    }

    pub fn put_download(&self, key: String, value: Arc<Value>) {
        self.download.insert(key, value);
    }
}
