//! # Stratus Store
//!
//! Bounded, concurrent key→value store with per-entry TTL metadata and a
//! persistable snapshot.
//!
//! ## Architecture
//!
//! - **Sharded locking**: the key space is split across independently
//!   locked shards, so lookups never contend with writes on unrelated keys
//! - **LRU eviction**: each shard evicts its least recently used entry
//!   when at capacity; per-shard capacities sum exactly to the configured
//!   size, so the global bound is strict
//! - **Lazy expiry**: `get` returns entries regardless of expiry along
//!   with their timestamps; freshness is the caller's decision
//!
//! ## Snapshots
//!
//! `dump` encodes all live entries into a self-describing byte sequence
//! using caller-supplied key/value codecs; `load_dump` merges a snapshot
//! back in, skipping entries that have expired in the meantime.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

pub mod entry;
mod shard;
mod snapshot;

pub use entry::Entry;

use shard::Shard;
use snapshot::SnapshotEntry;

/// Default number of shards.
const DEFAULT_SHARD_COUNT: usize = 32;

/// Store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store is closed")]
    Closed,

    #[error("snapshot encode error: {0}")]
    Encode(String),

    #[error("malformed snapshot: {0}")]
    BadSnapshot(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A bounded concurrent map of keys to TTL-stamped values.
pub struct Store<K, V> {
    shards: Box<[Shard<K, V>]>,
    hasher: RandomState,
    closed: AtomicBool,
}

impl<K: Hash + Eq + Clone, V: Clone> Store<K, V> {
    /// Creates a store holding at most `size` entries.
    ///
    /// A `size` of zero is treated as one.
    pub fn new(size: usize) -> Self {
        Self::with_shard_count(size, DEFAULT_SHARD_COUNT)
    }

    fn with_shard_count(size: usize, shard_count: usize) -> Self {
        let size = size.max(1);
        // Never more shards than entries, so every shard holds at least one.
        let count = shard_count.clamp(1, size);
        let base = size / count;
        let remainder = size % count;

        let shards = (0..count)
            .map(|i| Shard::new(base + usize::from(i < remainder)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            hasher: RandomState::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    /// Looks up a key, bumping its LRU recency.
    ///
    /// Returns the value and its stored/expiry times even when the entry
    /// has expired; callers decide what expiry means for them.
    pub fn get(&self, key: &K) -> Option<(V, SystemTime, SystemTime)> {
        self.shard_for(key).get(key)
    }

    /// Stores a value, overwriting any previous entry for the key.
    ///
    /// Returns false without storing when `expires_at` is not strictly
    /// after `stored_at`; such an entry could never be served.
    pub fn store(&self, key: K, value: V, stored_at: SystemTime, expires_at: SystemTime) -> bool {
        if expires_at <= stored_at {
            debug!("rejecting entry that expires at or before its store time");
            return false;
        }
        self.shard_for(&key)
            .insert(key, Entry::new(value, stored_at, expires_at));
        true
    }

    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all entries.
    pub fn flush(&self) {
        for shard in self.shards.iter() {
            shard.clear();
        }
    }

    /// Marks the store closed. Further snapshot operations fail with
    /// [`StoreError::Closed`]; reads and writes stay usable for callers
    /// still draining.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Encodes all entries that are live right now into snapshot bytes.
    ///
    /// `marshal_key`/`marshal_value` produce the persisted byte form of a
    /// key or value; entries they decline are skipped. Returns the bytes
    /// and the number of entries encoded.
    pub fn dump<MK, MV>(&self, marshal_key: MK, marshal_value: MV) -> Result<(Vec<u8>, usize)>
    where
        MK: Fn(&K) -> Option<Vec<u8>>,
        MV: Fn(&V) -> Option<Vec<u8>>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        let now = SystemTime::now();
        let mut live = Vec::new();
        for shard in self.shards.iter() {
            shard.collect_live(now, &mut live);
        }

        let mut entries = Vec::with_capacity(live.len());
        for (key, entry) in live {
            let (Some(key), Some(value)) = (marshal_key(&key), marshal_value(&entry.value))
            else {
                debug!("skipping entry that failed to marshal");
                continue;
            };
            entries.push(SnapshotEntry {
                key,
                value,
                stored_at_ms: snapshot::unix_ms(entry.stored_at),
                expires_at_ms: snapshot::unix_ms(entry.expires_at),
            });
        }

        let count = entries.len();
        let bytes = snapshot::encode(entries)?;
        Ok((bytes, count))
    }

    /// Merges a snapshot into the store.
    ///
    /// Every dumped entry that has not yet expired is present afterwards,
    /// overwriting any same-key entry. Malformed input, including key or
    /// value bytes the unmarshal functions reject, fails without touching
    /// the store. Returns the number of entries loaded.
    pub fn load_dump<UK, UV>(
        &self,
        bytes: &[u8],
        unmarshal_key: UK,
        unmarshal_value: UV,
    ) -> Result<usize>
    where
        UK: Fn(&[u8]) -> Option<K>,
        UV: Fn(&[u8]) -> Option<V>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        let raw = snapshot::decode(bytes)?;

        // Decode everything before inserting anything, so a bad entry in
        // the middle leaves the store unchanged.
        let mut decoded = Vec::with_capacity(raw.len());
        for entry in raw {
            let key = unmarshal_key(&entry.key)
                .ok_or_else(|| StoreError::BadSnapshot("undecodable key".to_string()))?;
            let value = unmarshal_value(&entry.value)
                .ok_or_else(|| StoreError::BadSnapshot("undecodable value".to_string()))?;
            decoded.push((
                key,
                value,
                snapshot::from_unix_ms(entry.stored_at_ms),
                snapshot::from_unix_ms(entry.expires_at_ms),
            ));
        }

        let now = SystemTime::now();
        let mut loaded = 0;
        for (key, value, stored_at, expires_at) in decoded {
            if expires_at <= now {
                continue;
            }
            if self.store(key, value, stored_at, expires_at) {
                loaded += 1;
            }
        }

        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    fn live_window() -> (SystemTime, SystemTime) {
        let now = SystemTime::now();
        (now, now + Duration::from_secs(300))
    }

    fn marshal_str(k: &String) -> Option<Vec<u8>> {
        Some(k.as_bytes().to_vec())
    }

    fn unmarshal_str(b: &[u8]) -> Option<String> {
        String::from_utf8(b.to_vec()).ok()
    }

    fn marshal_u32(v: &u32) -> Option<Vec<u8>> {
        Some(v.to_be_bytes().to_vec())
    }

    fn unmarshal_u32(b: &[u8]) -> Option<u32> {
        Some(u32::from_be_bytes(b.try_into().ok()?))
    }

    #[test]
    fn test_get_returns_expired_entries() {
        let store: Store<String, u32> = Store::new(16);
        store.store("k".to_string(), 7, at(0), at(60));

        let (value, stored_at, expires_at) = store.get(&"k".to_string()).unwrap();
        assert_eq!(value, 7);
        assert_eq!(stored_at, at(0));
        assert_eq!(expires_at, at(60));
    }

    #[test]
    fn test_size_bound_is_strict() {
        let store: Store<String, u32> = Store::new(8);
        for i in 0..100u32 {
            store.store(format!("key-{i}"), i, at(0), at(3600));
        }
        assert!(store.len() <= 8);
        assert!(!store.is_empty());
    }

    #[test]
    fn test_lru_eviction_respects_recency() {
        let store: Store<String, u32> = Store::with_shard_count(2, 1);
        store.store("a".to_string(), 1, at(0), at(3600));
        store.store("b".to_string(), 2, at(0), at(3600));

        // Touch "a" so "b" becomes the eviction candidate.
        store.get(&"a".to_string());
        store.store("c".to_string(), 3, at(0), at(3600));

        assert!(store.get(&"a".to_string()).is_some());
        assert!(store.get(&"b".to_string()).is_none());
        assert!(store.get(&"c".to_string()).is_some());
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let store: Store<String, u32> = Store::new(8);
        store.store("k".to_string(), 1, at(0), at(60));
        store.store("k".to_string(), 2, at(10), at(120));

        assert_eq!(store.len(), 1);
        let (value, stored_at, _) = store.get(&"k".to_string()).unwrap();
        assert_eq!(value, 2);
        assert_eq!(stored_at, at(10));
    }

    #[test]
    fn test_rejects_entry_expiring_before_store_time() {
        let store: Store<String, u32> = Store::new(8);
        assert!(!store.store("k".to_string(), 1, at(60), at(60)));
        assert!(!store.store("k".to_string(), 1, at(60), at(0)));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_flush() {
        let store: Store<String, u32> = Store::new(8);
        store.store("k".to_string(), 1, at(0), at(60));
        store.flush();
        assert!(store.is_empty());
        assert!(store.get(&"k".to_string()).is_none());
    }

    #[test]
    fn test_dump_load_round_trip() {
        let (stored_at, expires_at) = live_window();
        // Millisecond-precision timestamps so equality survives the trip.
        let stored_at = snapshot::from_unix_ms(snapshot::unix_ms(stored_at));
        let expires_at = snapshot::from_unix_ms(snapshot::unix_ms(expires_at));

        let store: Store<String, u32> = Store::new(16);
        store.store("one".to_string(), 1, stored_at, expires_at);
        store.store("two".to_string(), 2, stored_at, expires_at);

        let (bytes, count) = store.dump(marshal_str, marshal_u32).unwrap();
        assert_eq!(count, 2);

        let restored: Store<String, u32> = Store::new(16);
        let loaded = restored
            .load_dump(&bytes, unmarshal_str, unmarshal_u32)
            .unwrap();
        assert_eq!(loaded, 2);

        let (value, restored_stored, restored_expires) =
            restored.get(&"one".to_string()).unwrap();
        assert_eq!(value, 1);
        assert_eq!(restored_stored, stored_at);
        assert_eq!(restored_expires, expires_at);
    }

    #[test]
    fn test_dump_skips_expired_entries() {
        let now = SystemTime::now();
        let store: Store<String, u32> = Store::new(16);
        store.store(
            "dead".to_string(),
            1,
            now - Duration::from_secs(120),
            now - Duration::from_secs(60),
        );
        store.store("live".to_string(), 2, now, now + Duration::from_secs(60));

        let (_, count) = store.dump(marshal_str, marshal_u32).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_load_merges_over_existing_entries() {
        let (stored_at, expires_at) = live_window();

        let source: Store<String, u32> = Store::new(16);
        source.store("shared".to_string(), 2, stored_at, expires_at);
        let (bytes, _) = source.dump(marshal_str, marshal_u32).unwrap();

        let store: Store<String, u32> = Store::new(16);
        store.store("shared".to_string(), 1, stored_at, expires_at);
        store.store("kept".to_string(), 9, stored_at, expires_at);
        store.load_dump(&bytes, unmarshal_str, unmarshal_u32).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&"shared".to_string()).unwrap().0, 2);
        assert_eq!(store.get(&"kept".to_string()).unwrap().0, 9);
    }

    #[test]
    fn test_malformed_snapshot_leaves_store_unchanged() {
        let (stored_at, expires_at) = live_window();
        let store: Store<String, u32> = Store::new(16);
        store.store("k".to_string(), 1, stored_at, expires_at);

        assert!(store
            .load_dump(b"garbage", unmarshal_str, unmarshal_u32)
            .is_err());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"k".to_string()).unwrap().0, 1);
    }

    #[test]
    fn test_undecodable_value_leaves_store_unchanged() {
        let (stored_at, expires_at) = live_window();
        let source: Store<String, u32> = Store::new(16);
        source.store("a".to_string(), 1, stored_at, expires_at);
        let (bytes, _) = source.dump(marshal_str, marshal_u32).unwrap();

        let store: Store<String, u32> = Store::new(16);
        // A value decoder that rejects everything counts as a parse error.
        let result = store.load_dump(&bytes, unmarshal_str, |_: &[u8]| None::<u32>);
        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_operations_fail_after_close() {
        let store: Store<String, u32> = Store::new(16);
        store.close();

        assert!(matches!(
            store.dump(marshal_str, marshal_u32),
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            store.load_dump(b"", unmarshal_str, unmarshal_u32),
            Err(StoreError::Closed)
        ));
    }
}
