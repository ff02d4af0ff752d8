//! Single-flight launcher for background refreshes.

use crate::key::Fingerprint;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

/// Deduplicates concurrent background work by key.
///
/// `launch` spawns the work only when no task for the key is already in
/// flight, so per key at most one execution runs at any instant. The key
/// is released when the task finishes, however it finishes.
#[derive(Clone, Default)]
pub struct SingleFlight {
    in_flight: Arc<Mutex<HashSet<Fingerprint>>>,
}

impl SingleFlight {
    /// Creates an empty single-flight set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `work` for `key` unless a task for the key is in flight.
    ///
    /// Never blocks the caller; a duplicate launch is a no-op.
    pub fn launch<F>(&self, key: Fingerprint, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.in_flight.lock().insert(key.clone()) {
            return;
        }

        let guard = FlightGuard {
            key,
            in_flight: self.in_flight.clone(),
        };
        tokio::spawn(async move {
            // Moved into the task so the key is released even on panic.
            let _guard = guard;
            work.await;
        });
    }

    /// Returns the number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

struct FlightGuard {
    key: Fingerprint,
    in_flight: Arc<Mutex<HashSet<Fingerprint>>>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}
