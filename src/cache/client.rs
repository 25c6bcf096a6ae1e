//! Typed access to a cache store.
//!
//! `CacheClient` is the programmatic get/set/delete surface used directly by
//! call sites that cache by hand, and internally by the wrappers. It never
//! surfaces store failures: reads fail open to a miss and writes or deletes
//! that fail are logged and counted.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::keys::ResolvedKey;
use super::store::CacheStore;

const METRIC_CACHE_HIT: &str = "cachet_cache_hit_total";
const METRIC_CACHE_MISS: &str = "cachet_cache_miss_total";
const METRIC_CACHE_STORE_ERROR: &str = "cachet_cache_store_error_total";
const METRIC_CACHE_INVALIDATE: &str = "cachet_cache_invalidate_total";
const METRIC_CACHE_INVALIDATE_FAILED: &str = "cachet_cache_invalidate_failed_total";

#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    enabled: bool,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            enabled: config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Cached value for `key`, or `None` on miss, store failure, or a value
    /// that no longer decodes as `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &ResolvedKey) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                counter!(METRIC_CACHE_MISS).increment(1);
                return None;
            }
            Err(error) => {
                counter!(METRIC_CACHE_STORE_ERROR, "op" => "get").increment(1);
                warn!(key = %key, error = %error, "cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                Some(value)
            }
            Err(error) => {
                counter!(METRIC_CACHE_MISS).increment(1);
                warn!(key = %key, error = %error, "cached value failed to decode, treating as miss");
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl`. Returns whether it was stored.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &ResolvedKey,
        value: &T,
        ttl: Duration,
    ) -> bool {
        if !self.enabled {
            return false;
        }

        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => Bytes::from(bytes),
            Err(error) => {
                warn!(key = %key, error = %error, "value failed to encode, not cached");
                return false;
            }
        };

        match self.store.set(key, bytes, ttl).await {
            Ok(()) => {
                debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "cached value");
                true
            }
            Err(error) => {
                counter!(METRIC_CACHE_STORE_ERROR, "op" => "set").increment(1);
                warn!(key = %key, error = %error, "cache write failed, value not cached");
                false
            }
        }
    }

    /// Delete `key`. Returns whether the store accepted the delete.
    pub async fn delete(&self, key: &ResolvedKey) -> bool {
        if !self.enabled {
            return true;
        }

        match self.store.delete(key).await {
            Ok(()) => {
                counter!(METRIC_CACHE_INVALIDATE).increment(1);
                debug!(key = %key, "invalidated cache entry");
                true
            }
            Err(error) => {
                counter!(METRIC_CACHE_INVALIDATE_FAILED).increment(1);
                warn!(key = %key, error = %error, "cache invalidation failed; entry may stay stale until its TTL");
                false
            }
        }
    }
}
