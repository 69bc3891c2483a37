//! TTL cache for fetch results
//!
//! Keyed by [`FetchRequest`] (account, range, kind). Entries expire after
//! `ttl`; expired entries are dropped on read. Only successful fetches are
//! stored, so a failed kind is always retried on the next request.
//!
//! Two concurrent misses for the same key may both reach the worker; the
//! second insert simply overwrites the first with an equivalent result.

use crate::kind::{FetchRequest, FetchResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheMetrics {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: FetchResult,
    created_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<FetchRequest, CacheEntry>,
    metrics: CacheMetrics,
}

/// Shared fetch cache
#[derive(Debug)]
pub struct FetchCache {
    ttl: Duration,
    max_entries: usize,
    state: RwLock<CacheState>,
}

impl FetchCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            ttl: config.ttl(),
            max_entries: config.max_entries.max(1),
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            max_entries: default_max_entries(),
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached result for `request`, if present and fresh.
    pub async fn get(&self, request: &FetchRequest) -> Option<FetchResult> {
        let now = Instant::now();
        let mut state = self.state.write().await;

        let fresh = match state.entries.get(request) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                state.entries.remove(request);
                None
            }
            None => None,
        };

        match fresh {
            Some(_) => state.metrics.hits += 1,
            None => state.metrics.misses += 1,
        }
        state.metrics.entries = state.entries.len();
        fresh
    }

    pub async fn put(&self, request: FetchRequest, value: FetchResult) {
        let now = Instant::now();
        let mut state = self.state.write().await;

        if state.entries.len() >= self.max_entries && !state.entries.contains_key(&request) {
            Self::evict(&mut state, now);
        }

        state.entries.insert(
            request,
            CacheEntry {
                value,
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
        state.metrics.entries = state.entries.len();
    }

    /// Expired entries go first, then the oldest one.
    fn evict(state: &mut CacheState, now: Instant) {
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));

        if state.entries.len() == before {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                state.entries.remove(&key);
            }
        }
        state.metrics.evictions += (before - state.entries.len()) as u64;
    }

    /// Read-through: return the cached value or run `fetch` and store its success.
    pub async fn get_or_fetch<F, Fut, E>(&self, request: FetchRequest, fetch: F) -> Result<FetchResult, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FetchResult, E>>,
    {
        if let Some(hit) = self.get(&request).await {
            debug!(account = %request.account, kind = %request.kind, "Fetch cache hit");
            return Ok(hit);
        }

        let value = fetch().await?;
        self.put(request, value.clone()).await;
        Ok(value)
    }

    /// Drop every entry for an account. Returns the count removed.
    pub async fn invalidate_account(&self, account: &str) -> usize {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|key, _| key.account != account);
        state.metrics.entries = state.entries.len();
        before - state.entries.len()
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.metrics.entries = 0;
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    pub async fn metrics(&self) -> CacheMetrics {
        self.state.read().await.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::{AccountTarget, DataKind, DateRange};
    use chrono::NaiveDate;
    use serde_json::json;

    fn request(alias: &str, kind: DataKind) -> FetchRequest {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        )
        .unwrap();
        FetchRequest::new(&AccountTarget::new(alias, "acct", "KEY"), range, kind)
    }

    fn result(request: &FetchRequest) -> FetchResult {
        FetchResult::new(request, vec![json!({"name": "record"})])
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = FetchCache::with_ttl(Duration::from_secs(60));
        let key = request("acme", DataKind::Segments);
        cache.put(key.clone(), result(&key)).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(&key).await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key).await.is_none());
        assert!(cache.is_empty().await);

        let metrics = cache.metrics().await;
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_skips_errors() {
        let cache = FetchCache::new(CacheConfig::default());
        let key = request("acme", DataKind::Flows);

        let failed: Result<FetchResult, String> =
            cache.get_or_fetch(key.clone(), || async { Err("boom".to_string()) }).await;
        assert!(failed.is_err());
        assert!(cache.is_empty().await);

        let expected = result(&key);
        let fetched: Result<FetchResult, String> = cache
            .get_or_fetch(key.clone(), || {
                let expected = expected.clone();
                async move { Ok(expected) }
            })
            .await;
        assert_eq!(fetched.unwrap(), expected);

        let cached: Result<FetchResult, String> = cache
            .get_or_fetch(key, || async { Err("should not run".to_string()) })
            .await;
        assert_eq!(cached.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_eviction_at_capacity() {
        let cache = FetchCache::new(CacheConfig {
            ttl_secs: 3600,
            max_entries: 2,
        });
        for kind in [DataKind::Segments, DataKind::Campaigns, DataKind::Flows] {
            let key = request("acme", kind);
            cache.put(key.clone(), result(&key)).await;
        }
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.metrics().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_invalidate_account() {
        let cache = FetchCache::new(CacheConfig::default());
        for alias in ["acme", "globex"] {
            let key = request(alias, DataKind::Lists);
            cache.put(key.clone(), result(&key)).await;
        }
        assert_eq!(cache.invalidate_account("acme").await, 1);
        assert_eq!(cache.len().await, 1);
    }
}
