//! Snapshot persistence: startup load, threshold-gated dump loop, and the
//! wire codecs that turn cached DNS messages into snapshot bytes.

use crate::key::Fingerprint;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stratus_store::{Store, StoreError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// The store specialization used by the cache stage.
pub(crate) type DnsStore = Store<Fingerprint, Message>;

/// Snapshot attempts are skipped until this many entries changed.
pub(crate) const MINIMUM_CHANGES_TO_DUMP: u64 = 1024;

/// Persistence error types.
#[derive(Error, Debug)]
pub(crate) enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub(crate) fn marshal_key(key: &Fingerprint) -> Option<Vec<u8>> {
    Some(key.as_bytes().to_vec())
}

pub(crate) fn unmarshal_key(bytes: &[u8]) -> Option<Fingerprint> {
    Some(Fingerprint::from_bytes(bytes.to_vec()))
}

pub(crate) fn marshal_message(message: &Message) -> Option<Vec<u8>> {
    message.to_bytes().ok()
}

pub(crate) fn unmarshal_message(bytes: &[u8]) -> Option<Message> {
    Message::from_bytes(bytes).ok()
}

/// Loads a snapshot file into the store.
///
/// A missing file is not an error and loads nothing.
pub(crate) async fn load_snapshot(store: &DnsStore, path: &Path) -> Result<usize, PersistError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let loaded = store.load_dump(&bytes, unmarshal_key, unmarshal_message)?;
    Ok(loaded)
}

/// Writes a snapshot of the store to `path`, replacing prior contents.
///
/// The bytes land in a temporary file first and are renamed into place so
/// a crash mid-write never corrupts an existing snapshot.
pub(crate) async fn write_snapshot(store: &DnsStore, path: &Path) -> Result<(), PersistError> {
    let (bytes, entries) = store.dump(marshal_key, marshal_message)?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;

    info!(
        path = %path.display(),
        file_size = bytes.len(),
        entries,
        "cache snapshot written"
    );
    Ok(())
}

/// Consumes the change counter for a dump attempt.
///
/// Swaps the counter to zero and returns the swapped value when it meets
/// the dump threshold. Below the threshold the count is put back and
/// `None` is returned, so changes keep accumulating toward the next tick.
pub(crate) fn take_changes(changes: &AtomicU64) -> Option<u64> {
    let count = changes.swap(0, Ordering::AcqRel);
    if count < MINIMUM_CHANGES_TO_DUMP {
        changes.fetch_add(count, Ordering::AcqRel);
        return None;
    }
    Some(count)
}

/// Periodically snapshots the store until the close signal fires.
pub(crate) async fn run_dump_loop(
    store: Arc<DnsStore>,
    changes: Arc<AtomicU64>,
    path: PathBuf,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(count) = take_changes(&changes) else {
                    debug!("skipping snapshot, not enough changes");
                    continue;
                };
                if let Err(e) = write_snapshot(&store, &path).await {
                    // Put the consumed budget back so the changes stay
                    // visible to the next attempt.
                    changes.fetch_add(count, Ordering::AcqRel);
                    error!(path = %path.display(), error = %e, "cache snapshot failed");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
