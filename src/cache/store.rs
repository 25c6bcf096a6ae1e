//! Cache store contract and the in-memory backend.
//!
//! The contract is deliberately small: get, set with TTL, and idempotent
//! delete, all by exact key. There is no pattern delete or scan, so any
//! backend that can hold key/value pairs with expiry can implement it.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::keys::ResolvedKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";
const METRIC_CACHE_EXPIRED: &str = "cachet_cache_expired_total";
const METRIC_CACHE_CAPACITY_EVICT: &str = "cachet_cache_capacity_evict_total";

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache backend timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// Backend for cached values.
///
/// Implementations must be safe to call from many in-flight requests at once;
/// the wrappers coordinate no locking of their own.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns `None` for absent and expired entries alike.
    async fn get(&self, key: &ResolvedKey) -> Result<Option<Bytes>, StoreError>;

    async fn set(&self, key: &ResolvedKey, value: Bytes, ttl: Duration) -> Result<(), StoreError>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &ResolvedKey) -> Result<(), StoreError>;
}

/// A stored value and the instant it stops being served.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    pub expires_at: OffsetDateTime,
}

impl CacheEntry {
    pub fn new(value: Bytes, written_at: OffsetDateTime, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: expiry_after(written_at, ttl),
        }
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

fn expiry_after(written_at: OffsetDateTime, ttl: Duration) -> OffsetDateTime {
    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| written_at.checked_add(ttl))
        .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}

/// In-process store with lazy expiry and a capacity bound.
///
/// Expired entries are dropped when a read finds them. When the store is
/// full, the least recently used entry makes room for the new one.
pub struct MemoryStore {
    entries: RwLock<LruCache<ResolvedKey, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.store_capacity_non_zero())),
            clock,
        }
    }

    /// Number of held entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &ResolvedKey) -> Result<Option<Bytes>, StoreError> {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        let found = entries
            .get(key)
            .map(|entry| (entry.is_expired_at(now), entry.value.clone()));

        match found {
            Some((false, value)) => Ok(Some(value)),
            Some((true, _)) => {
                entries.pop(key);
                counter!(METRIC_CACHE_EXPIRED).increment(1);
                debug!(key = %key, "dropped expired cache entry");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &ResolvedKey, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let entry = CacheEntry::new(value, self.clock.now(), ttl);
        let displaced = rw_write(&self.entries, SOURCE, "set").push(key.clone(), entry);

        if let Some((evicted, _)) = displaced.filter(|(evicted, _)| evicted != key) {
            counter!(METRIC_CACHE_CAPACITY_EVICT).increment(1);
            debug!(key = %evicted, "evicted least recently used cache entry");
        }
        Ok(())
    }

    async fn delete(&self, key: &ResolvedKey) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "delete").pop(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::cache::clock::ManualClock;

    fn store_with_clock(capacity: usize) -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = CacheConfig {
            store_capacity: capacity,
            ..Default::default()
        };
        (MemoryStore::with_clock(&config, clock.clone()), clock)
    }

    fn key(value: &str) -> ResolvedKey {
        ResolvedKey::new(value)
    }

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let (store, _clock) = store_with_clock(8);

        assert!(store.get(&key("a")).await.unwrap().is_none());

        store
            .set(&key("a"), Bytes::from_static(b"one"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(
            store.get(&key("a")).await.unwrap(),
            Some(Bytes::from_static(b"one"))
        );

        store.delete(&key("a")).await.unwrap();
        assert!(store.get(&key("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_of_absent_key_is_ok() {
        let (store, _clock) = store_with_clock(8);
        assert!(store.delete(&key("never-set")).await.is_ok());
        assert!(store.delete(&key("never-set")).await.is_ok());
    }

    #[tokio::test]
    async fn entry_is_served_until_ttl_and_not_after() {
        let (store, clock) = store_with_clock(8);
        let ttl = Duration::from_millis(300_000);

        store
            .set(&key("list:u1:{}"), Bytes::from_static(b"R1"), ttl)
            .await
            .unwrap();

        clock.advance(ttl - Duration::from_millis(1));
        assert!(store.get(&key("list:u1:{}")).await.unwrap().is_some());

        clock.advance(Duration::from_millis(2));
        assert!(store.get(&key("list:u1:{}")).await.unwrap().is_none());
        assert!(store.is_empty(), "expired entry is dropped on read");
    }

    #[tokio::test]
    async fn overwrite_refreshes_expiry() {
        let (store, clock) = store_with_clock(8);
        let ttl = Duration::from_secs(10);

        store.set(&key("k"), Bytes::from_static(b"1"), ttl).await.unwrap();
        clock.advance(Duration::from_secs(8));
        store.set(&key("k"), Bytes::from_static(b"2"), ttl).await.unwrap();
        clock.advance(Duration::from_secs(8));

        assert_eq!(
            store.get(&key("k")).await.unwrap(),
            Some(Bytes::from_static(b"2"))
        );
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let (store, _clock) = store_with_clock(2);
        let ttl = Duration::from_secs(60);

        store.set(&key("a"), Bytes::from_static(b"a"), ttl).await.unwrap();
        store.set(&key("b"), Bytes::from_static(b"b"), ttl).await.unwrap();

        // Touch `a` so `b` becomes the eviction candidate.
        assert!(store.get(&key("a")).await.unwrap().is_some());
        store.set(&key("c"), Bytes::from_static(b"c"), ttl).await.unwrap();

        assert!(store.get(&key("a")).await.unwrap().is_some());
        assert!(store.get(&key("b")).await.unwrap().is_none());
        assert!(store.get(&key("c")).await.unwrap().is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn huge_ttl_saturates_instead_of_overflowing() {
        let entry = CacheEntry::new(
            Bytes::new(),
            OffsetDateTime::now_utc(),
            Duration::from_secs(u64::MAX),
        );
        assert!(!entry.is_expired_at(OffsetDateTime::now_utc()));
    }

    #[tokio::test]
    async fn store_recovers_from_poisoned_lock() {
        let (store, _clock) = store_with_clock(8);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store
            .set(&key("after"), Bytes::from_static(b"ok"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(store.get(&key("after")).await.unwrap().is_some());
    }
}
