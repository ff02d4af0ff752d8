//! A single store shard.

use super::Entry;
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::SystemTime;

/// One LRU-ordered slice of the store's key space.
///
/// Each shard is independently locked, so lookups of unrelated keys never
/// contend with insertions on other shards.
pub(crate) struct Shard<K, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
}

impl<K: Hash + Eq + Clone, V: Clone> Shard<K, V> {
    /// Creates a shard holding at most `capacity` entries.
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Looks up a key, bumping its recency.
    ///
    /// Returns the value together with its stored/expiry times regardless
    /// of expiry; freshness is the caller's decision.
    pub(crate) fn get(&self, key: &K) -> Option<(V, SystemTime, SystemTime)> {
        let mut entries = self.entries.lock();
        entries
            .get(key)
            .map(|e| (e.value.clone(), e.stored_at, e.expires_at))
    }

    /// Inserts an entry, overwriting any prior value for the key and
    /// evicting the least recently used entry when at capacity.
    pub(crate) fn insert(&self, key: K, entry: Entry<V>) {
        self.entries.lock().put(key, entry);
    }

    /// Clones out all entries that are still live at `now`.
    pub(crate) fn collect_live(&self, now: SystemTime, out: &mut Vec<(K, Entry<V>)>) {
        let entries = self.entries.lock();
        for (key, entry) in entries.iter() {
            if !entry.is_expired(now) {
                out.push((key.clone(), entry.clone()));
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}
