//! Result caching for service handlers.
//!
//! Read handlers are wrapped in [`Cacheable`], which serves a stored result
//! for a resolved key and otherwise runs the handler and stores what it
//! returns. Mutating handlers are wrapped in [`CacheEvict`], which deletes the
//! keys its [`InvalidationRule`] names once the mutation has succeeded.
//! Call sites that cache by hand use [`CacheClient`] directly.
//!
//! ## Keys
//!
//! Keys come from templates such as `list:{owner}:{query}`. Slots are filled
//! from a [`KeyContext`] built by the argument type's [`KeyFields`] impl;
//! query objects render as canonical JSON, so field order never splits a key.
//! Templates are checked against the declared fields when a wrapper is built.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! list_ttl_ms = 300000
//! detail_ttl_ms = 900000
//! store_capacity = 10000
//! eviction_mode = "enumerated"   # or "owner_index"
//! ```
//!
//! In `enumerated` mode a mutation evicts only the configured common list
//! shapes; lists cached under any other filter stay stale for up to the list
//! TTL. `owner_index` additionally evicts every key cached for the acting
//! principal.

mod cacheable;
mod client;
mod clock;
mod config;
mod evict;
mod handler;
mod keys;
mod lock;
mod registry;
mod store;
mod template;

pub use cacheable::Cacheable;
pub use client::CacheClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, EvictionMode};
pub use evict::{CacheEvict, EvictTarget, InvalidationRule, evict_rule};
pub use handler::{Handler, HandlerFn, handler_fn};
pub use keys::{
    ContextValue, KeyContext, KeyFields, Owned, PrincipalId, ResolvedKey, canonical_query,
};
pub use registry::OwnerIndex;
pub use store::{CacheEntry, CacheStore, MemoryStore, StoreError};
pub use template::{KeyError, KeyTemplate};
