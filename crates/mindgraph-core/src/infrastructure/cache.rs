//! Query-side cache
//!
//! LRU of serialized query results keyed by (operation, user, parameters),
//! each entry valid for a fixed TTL. Command handlers call
//! [`QueryCache::invalidate_user`] after every successful commit; the cache
//! itself never checks the store. A load that was already running when its
//! user was invalidated returns its value but does not cache it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::domain::values::UserId;
use crate::error::Result;

/// Cache key: query name, owner and canonical parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub operation: &'static str,
    pub user_id: UserId,
    pub params: String,
}

impl CacheKey {
    pub fn new(operation: &'static str, user_id: &UserId, params: impl Into<String>) -> Self {
        Self {
            operation,
            user_id: user_id.clone(),
            params: params.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.operation, self.user_id, self.params)
    }
}

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
}

struct CacheState {
    entries: LruCache<CacheKey, CacheEntry>,
    /// Bumped by every invalidation of the user
    generations: HashMap<UserId, u64>,
}

impl CacheState {
    fn generation(&self, user_id: &UserId) -> u64 {
        self.generations.get(user_id).copied().unwrap_or(0)
    }
}

/// TTL-bounded LRU of query results
pub struct QueryCache {
    state: Mutex<CacheState>,
    ttl: Duration,
    enabled: bool,
}

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                generations: HashMap::new(),
            }),
            ttl: config.ttl(),
            enabled: config.enabled && config.capacity > 0,
        }
    }

    /// A cache that stores nothing
    pub fn disabled() -> Self {
        Self::new(&CacheConfig {
            enabled: false,
            ..Default::default()
        })
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Get a fresh entry, dropping it if its TTL ran out
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let mut state = self.lock();
        let fresh = match state.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => None,
            None => return None,
        };
        if fresh.is_none() {
            state.entries.pop(key);
            trace!(key = %key, "Cache entry expired");
        }
        fresh
    }

    pub fn insert(&self, key: CacheKey, value: Value) {
        if !self.enabled {
            return;
        }
        Self::put(&mut self.lock(), key, value);
    }

    fn put(state: &mut CacheState, key: CacheKey, value: Value) {
        state.entries.put(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Return the cached value for `key` or run `load` and cache its result
    pub async fn get_or_load<T, F, Fut>(&self, key: CacheKey, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get(&key) {
            if let Ok(value) = serde_json::from_value(cached) {
                trace!(key = %key, "Cache hit");
                return Ok(value);
            }
        }

        let generation = self.lock().generation(&key.user_id);
        let value = load().await?;
        if self.enabled {
            let serialized = serde_json::to_value(&value)?;
            let mut state = self.lock();
            if state.generation(&key.user_id) == generation {
                Self::put(&mut state, key, serialized);
            } else {
                debug!(key = %key, "Discarding load that raced an invalidation");
            }
        }
        Ok(value)
    }

    /// Drop every entry belonging to `user_id`
    pub fn invalidate_user(&self, user_id: &UserId) -> usize {
        let mut state = self.lock();
        *state.generations.entry(user_id.clone()).or_insert(0) += 1;
        let stale: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(key, _)| &key.user_id == user_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            state.entries.pop(key);
        }
        if !stale.is_empty() {
            debug!(user_id = %user_id, removed = stale.len(), "Invalidated query cache");
        }
        stale.len()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Current size and capacity
    pub fn stats(&self) -> (usize, usize) {
        let state = self.lock();
        (state.entries.len(), state.entries.cap().get())
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    #[test]
    fn test_hit_and_invalidate_per_user() {
        let cache = QueryCache::default();
        let (alice, bob) = (user("alice"), user("bob"));

        cache.insert(CacheKey::new("get_node", &alice, "n1"), json!(1));
        cache.insert(CacheKey::new("list_nodes", &alice, "20"), json!(2));
        cache.insert(CacheKey::new("get_node", &bob, "n1"), json!(3));

        assert_eq!(cache.get(&CacheKey::new("get_node", &alice, "n1")), Some(json!(1)));
        assert_eq!(cache.invalidate_user(&alice), 2);
        assert!(cache.get(&CacheKey::new("get_node", &alice, "n1")).is_none());
        assert_eq!(cache.get(&CacheKey::new("get_node", &bob, "n1")), Some(json!(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = QueryCache::new(&CacheConfig {
            ttl_secs: 300,
            ..Default::default()
        });
        let key = CacheKey::new("graph_stats", &user("alice"), "");
        cache.insert(key.clone(), json!({"nodes": 1}));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get(&key).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().0, 0);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = QueryCache::new(&CacheConfig {
            capacity: 2,
            ..Default::default()
        });
        let alice = user("alice");
        for i in 0..3 {
            cache.insert(CacheKey::new("get_node", &alice, i.to_string()), json!(i));
        }
        assert!(cache.get(&CacheKey::new("get_node", &alice, "0")).is_none());
        assert_eq!(cache.stats(), (2, 2));
    }

    #[tokio::test]
    async fn test_get_or_load_caches() {
        let cache = QueryCache::default();
        let key = CacheKey::new("count", &user("alice"), "");

        let first: u32 = cache.get_or_load(key.clone(), || async { Ok(7) }).await.unwrap();
        let second: u32 = cache
            .get_or_load(key, || async {
                Err(crate::error::Error::internal("loader must not run on a hit"))
            })
            .await
            .unwrap();
        assert_eq!((first, second), (7, 7));
    }

    #[tokio::test]
    async fn test_load_overtaken_by_invalidation_is_not_cached() {
        let cache = QueryCache::default();
        let alice = user("alice");
        let key = CacheKey::new("get_node", &alice, "n1");

        let stale: u32 = cache
            .get_or_load(key.clone(), || async {
                // a write commits while this read is in flight
                cache.invalidate_user(&alice);
                Ok(1)
            })
            .await
            .unwrap();
        assert_eq!(stale, 1);
        assert!(cache.get(&key).is_none());

        let fresh: u32 = cache.get_or_load(key.clone(), || async { Ok(2) }).await.unwrap();
        assert_eq!(fresh, 2);
        assert_eq!(cache.get(&key), Some(json!(2)));
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = QueryCache::disabled();
        let key = CacheKey::new("get_node", &user("alice"), "n1");
        cache.insert(key.clone(), json!(1));
        assert!(cache.get(&key).is_none());
    }
}
