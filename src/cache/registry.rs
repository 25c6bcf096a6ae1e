//! Owner index.
//!
//! Records which resolved keys were populated on behalf of each principal, so
//! a mutation can evict everything cached for its owner without a
//! pattern-delete primitive in the store.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::RwLock;

use lru::LruCache;

use super::keys::{PrincipalId, ResolvedKey};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// Tracks principal → keys and key → principals.
///
/// The index holds at most `capacity` keys, least recently registered or
/// touched first out. Sized to the store's capacity it tracks at least every
/// key the store can still hold; [`OwnerIndex::register`] hands back the key
/// it pushed out so the caller can delete it from the store too. Expired
/// entries stay indexed until pushed out or drained; deleting an absent key
/// is harmless, so the index only ever over-approximates.
pub struct OwnerIndex {
    owner_to_keys: RwLock<HashMap<PrincipalId, HashSet<ResolvedKey>>>,
    key_to_owners: RwLock<LruCache<ResolvedKey, HashSet<PrincipalId>>>,
}

impl OwnerIndex {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            owner_to_keys: RwLock::new(HashMap::new()),
            key_to_owners: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Record `key` under `owner`. Returns the key pushed out to make room,
    /// if any.
    pub fn register(&self, owner: PrincipalId, key: ResolvedKey) -> Option<ResolvedKey> {
        let mut o2k = rw_write(&self.owner_to_keys, SOURCE, "register.owner_to_keys");
        let mut k2o = rw_write(&self.key_to_owners, SOURCE, "register.key_to_owners");

        let mut displaced = None;
        if let Some(owners) = k2o.get_mut(&key) {
            owners.insert(owner.clone());
        } else if let Some((evicted, owners)) =
            k2o.push(key.clone(), HashSet::from([owner.clone()]))
        {
            unlink(&mut o2k, &evicted, owners);
            displaced = Some(evicted);
        }

        o2k.entry(owner).or_default().insert(key);
        displaced
    }

    /// Mark `key` as recently used, e.g. on a cache hit.
    pub fn touch(&self, key: &ResolvedKey) {
        rw_write(&self.key_to_owners, SOURCE, "touch").promote(key);
    }

    pub fn keys_for_owner(&self, owner: &PrincipalId) -> HashSet<ResolvedKey> {
        rw_read(&self.owner_to_keys, SOURCE, "keys_for_owner")
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove every key recorded for `owner` and return them.
    ///
    /// Keys shared with other principals are unlinked from those principals
    /// as well, since the caller is about to delete them from the store.
    pub fn drain_owner(&self, owner: &PrincipalId) -> HashSet<ResolvedKey> {
        let mut o2k = rw_write(&self.owner_to_keys, SOURCE, "drain_owner.owner_to_keys");
        let mut k2o = rw_write(&self.key_to_owners, SOURCE, "drain_owner.key_to_owners");

        let keys = o2k.remove(owner).unwrap_or_default();
        for key in &keys {
            let others = k2o.pop(key).unwrap_or_default();
            unlink(&mut o2k, key, others);
        }
        keys
    }

    /// Forget a key, e.g. after it was deleted directly.
    pub fn unregister(&self, key: &ResolvedKey) {
        let mut o2k = rw_write(&self.owner_to_keys, SOURCE, "unregister.owner_to_keys");
        let mut k2o = rw_write(&self.key_to_owners, SOURCE, "unregister.key_to_owners");

        if let Some(owners) = k2o.pop(key) {
            unlink(&mut o2k, key, owners);
        }
    }

    pub fn clear(&self) {
        rw_write(&self.owner_to_keys, SOURCE, "clear.owner_to_keys").clear();
        rw_write(&self.key_to_owners, SOURCE, "clear.key_to_owners").clear();
    }

    pub fn owner_count(&self) -> usize {
        rw_read(&self.owner_to_keys, SOURCE, "owner_count").len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.key_to_owners, SOURCE, "key_count").len()
    }

    pub fn capacity(&self) -> NonZeroUsize {
        rw_read(&self.key_to_owners, SOURCE, "capacity").cap()
    }
}

fn unlink(
    owner_to_keys: &mut HashMap<PrincipalId, HashSet<ResolvedKey>>,
    key: &ResolvedKey,
    owners: HashSet<PrincipalId>,
) {
    for owner in owners {
        if let Some(keys) = owner_to_keys.get_mut(&owner) {
            keys.remove(key);
            if keys.is_empty() {
                owner_to_keys.remove(&owner);
            }
        }
    }
}
