//! Read-through cache over a `RemoteStore`.
//!
//! Every cache key owns a reader/writer lock: readers probe the entry map
//! concurrently, and a miss takes the key's writer lock, re-checks, then
//! performs the single remote fetch while concurrent callers for the same
//! key queue on the lock. Writes to the store never pass through here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::remote::{Lookup, RemoteStore, StoreResult};

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

pub struct StoreCache {
    store: Arc<dyn RemoteStore>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// Per-key locks, created lazily and retained for the process lifetime.
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl StoreCache {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    fn cache_key(method: &str, endpoint: &str, lookup: &Lookup) -> String {
        format!("{endpoint}.{method}:{}", lookup.encode())
    }

    fn key_lock(&self, key: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    fn probe(&self, key: &str) -> Option<Value> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.entries.lock().insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Evict every cached result, used when the graph is known stale.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Cached single-record fetch; a fresh entry lives for `ttl`. At most
    /// one remote request is in flight per cache key; losers of the race
    /// read the winner's entry.
    pub async fn get(&self, endpoint: &str, lookup: &Lookup, ttl: Duration) -> StoreResult<Value> {
        let key = Self::cache_key("get", endpoint, lookup);
        let lock = self.key_lock(&key);

        {
            let _read = lock.read().await;
            if let Some(value) = self.probe(&key) {
                tracing::debug!(%key, "cache hit");
                return Ok(value);
            }
        }

        let _write = lock.write().await;
        // A concurrent writer may have filled the entry while we waited.
        if let Some(value) = self.probe(&key) {
            tracing::debug!(%key, "cache hit after wait");
            return Ok(value);
        }

        tracing::debug!(%key, "cache miss");
        let value = self.store.get_one(endpoint, lookup).await?;
        self.set(&key, value.clone(), ttl);
        Ok(value)
    }

    /// Cached list fetch with the same single-flight discipline.
    pub async fn filter(
        &self,
        endpoint: &str,
        lookup: &Lookup,
        ttl: Duration,
    ) -> StoreResult<Vec<Value>> {
        let key = Self::cache_key("filter", endpoint, lookup);
        let lock = self.key_lock(&key);

        {
            let _read = lock.read().await;
            if let Some(Value::Array(items)) = self.probe(&key) {
                tracing::debug!(%key, "cache hit");
                return Ok(items);
            }
        }

        let _write = lock.write().await;
        if let Some(Value::Array(items)) = self.probe(&key) {
            tracing::debug!(%key, "cache hit after wait");
            return Ok(items);
        }

        tracing::debug!(%key, "cache miss");
        let items = self.store.get_list(endpoint, lookup).await?;
        self.set(&key, Value::Array(items.clone()), ttl);
        Ok(items)
    }
}
