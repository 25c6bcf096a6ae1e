//! Cache configuration.
//!
//! Holds the two TTL tiers (short for collections, long for single entities),
//! the store bound, and the eviction policy used by write paths.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

const DEFAULT_LIST_TTL_MS: u64 = 300_000;
const DEFAULT_DETAIL_TTL_MS: u64 = 900_000;
const DEFAULT_STORE_CAPACITY: usize = 10_000;

/// How a mutation decides which list entries to evict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionMode {
    /// Evict only the configured common list-query shapes. Lists cached under
    /// any other shape stay stale for up to the list TTL.
    #[default]
    Enumerated,
    /// Additionally evict every key recorded for the acting principal.
    OwnerIndex,
}

impl EvictionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionMode::Enumerated => "enumerated",
            EvictionMode::OwnerIndex => "owner_index",
        }
    }
}

/// Cache configuration from `cachet.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve and populate cached results. When off, wrappers pass through.
    pub enabled: bool,
    /// TTL for collection (list) results, in milliseconds.
    pub list_ttl_ms: u64,
    /// TTL for single-entity results, in milliseconds.
    pub detail_ttl_ms: u64,
    /// Maximum entries held by the in-memory store.
    pub store_capacity: usize,
    pub eviction_mode: EvictionMode,
    /// List-query shapes a mutation always evicts, as query objects.
    pub common_list_queries: Vec<Value>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            list_ttl_ms: DEFAULT_LIST_TTL_MS,
            detail_ttl_ms: DEFAULT_DETAIL_TTL_MS,
            store_capacity: DEFAULT_STORE_CAPACITY,
            eviction_mode: EvictionMode::default(),
            common_list_queries: default_common_list_queries(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            list_ttl_ms: settings.list_ttl.as_millis() as u64,
            detail_ttl_ms: settings.detail_ttl.as_millis() as u64,
            store_capacity: settings.store_capacity.get(),
            eviction_mode: settings.eviction_mode,
            common_list_queries: settings.common_list_queries.clone(),
        }
    }
}

impl CacheConfig {
    pub fn list_ttl(&self) -> Duration {
        Duration::from_millis(self.list_ttl_ms)
    }

    pub fn detail_ttl(&self) -> Duration {
        Duration::from_millis(self.detail_ttl_ms)
    }

    /// Returns the store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn store_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.store_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn uses_owner_index(&self) -> bool {
        self.eviction_mode == EvictionMode::OwnerIndex
    }

    /// Longest time a list cached under an uncommon query shape can keep
    /// serving pre-mutation results.
    pub fn list_staleness_bound(&self) -> Duration {
        match self.eviction_mode {
            EvictionMode::Enumerated => self.list_ttl(),
            EvictionMode::OwnerIndex => Duration::ZERO,
        }
    }
}

/// The unfiltered first page, with and without an explicit page number.
pub(crate) fn default_common_list_queries() -> Vec<Value> {
    vec![json!({}), json!({"page": 1})]
}
