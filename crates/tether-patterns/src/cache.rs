//! Deduplicating resource cache over weak handles.

use std::collections::HashMap;
use std::hash::Hash;

use log::debug;
use tether_mem::{Shared, Weak};

/// A cache mapping keys to weak handles.
///
/// Holding only weak edges means the cache never decides resource
/// lifetime: a resource lives exactly as long as callers hold shared
/// handles to it. While any caller does, lookups for the same key
/// deduplicate to the live resource; once the last caller lets go, the
/// next lookup recreates it.
///
/// # Example
///
/// ```
/// use tether_mem::Shared;
/// use tether_patterns::ResourceCache;
///
/// let mut cache: ResourceCache<&str, String> = ResourceCache::new();
///
/// let first = cache.get_or_create("texture", || "pixels".to_string());
/// let again = cache.get_or_create("texture", || unreachable!("still live"));
/// assert!(Shared::same_control_block(&first, &again));
///
/// drop((first, again));
/// // Expired now: the factory runs again.
/// let fresh = cache.get_or_create("texture", || "pixels".to_string());
/// assert_eq!(*fresh, "pixels");
/// ```
pub struct ResourceCache<K, T> {
    entries: HashMap<K, Weak<T>>,
}

impl<K: Eq + Hash, T> ResourceCache<K, T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Look up `key`, returning the live resource if some caller still
    /// owns it, or creating it via `factory` otherwise.
    pub fn get_or_create(&mut self, key: K, factory: impl FnOnce() -> T) -> Shared<T> {
        if let Some(weak) = self.entries.get(&key) {
            if let Some(live) = weak.upgrade() {
                debug!("cache hit");
                return live;
            }
        }
        debug!("cache miss; creating resource");
        let fresh = Shared::new(factory());
        self.entries.insert(key, Shared::downgrade(&fresh));
        fresh
    }

    /// Look up `key` without creating: `None` if absent or expired.
    pub fn get(&self, key: &K) -> Option<Shared<T>> {
        self.entries.get(key).and_then(|weak| weak.upgrade())
    }

    /// Drop entries whose resource has expired. Returns how many were
    /// removed. Purely housekeeping — expired entries are also handled
    /// lazily by [`get_or_create`][ResourceCache::get_or_create].
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| !weak.expired());
        before - self.entries.len()
    }

    /// Number of entries, live or expired.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache has no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, T> Default for ResourceCache<K, T> {
    fn default() -> Self {
        Self::new()
    }
}
