//! Snapshot wire format.
//!
//! A snapshot is a self-describing byte sequence: a fixed magic, a format
//! version, and a list of entries carrying opaque key/value bytes plus the
//! entry's stored/expiry timestamps as unix milliseconds. Key and value
//! encodings are supplied by the store's caller, so the format itself is
//! payload-agnostic.

use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

const MAGIC: [u8; 4] = *b"SDMP";
const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    magic: [u8; 4],
    version: u32,
    entries: Vec<SnapshotEntry>,
}

/// One persisted entry.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SnapshotEntry {
    pub(crate) key: Vec<u8>,
    pub(crate) value: Vec<u8>,
    pub(crate) stored_at_ms: u64,
    pub(crate) expires_at_ms: u64,
}

/// Converts a wall-clock time to unix milliseconds.
pub(crate) fn unix_ms(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Converts unix milliseconds back to a wall-clock time.
pub(crate) fn from_unix_ms(ms: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
}

/// Encodes entries into snapshot bytes.
pub(crate) fn encode(entries: Vec<SnapshotEntry>) -> Result<Vec<u8>, StoreError> {
    let snapshot = Snapshot {
        magic: MAGIC,
        version: VERSION,
        entries,
    };
    bincode::serialize(&snapshot).map_err(|e| StoreError::Encode(e.to_string()))
}

/// Decodes snapshot bytes, validating magic and version.
pub(crate) fn decode(bytes: &[u8]) -> Result<Vec<SnapshotEntry>, StoreError> {
    let snapshot: Snapshot =
        bincode::deserialize(bytes).map_err(|e| StoreError::BadSnapshot(e.to_string()))?;

    if snapshot.magic != MAGIC {
        return Err(StoreError::BadSnapshot("bad magic".to_string()));
    }
    if snapshot.version != VERSION {
        return Err(StoreError::BadSnapshot(format!(
            "unsupported version {}",
            snapshot.version
        )));
    }

    Ok(snapshot.entries)
}
