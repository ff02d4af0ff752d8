//! # Stratus Cache
//!
//! DNS response cache stage with lazy (stale-while-revalidate) refresh.
//!
//! ## Architecture
//!
//! The stage sits in a query pipeline and serves responses from a bounded
//! in-memory store whenever it can:
//!
//! - **Fresh hit**: the entry is younger than its minimal RR TTL; a clone
//!   with decremented TTLs is served immediately
//! - **Lazy hit**: the entry expired but lazy mode is on; the stale answer
//!   is served with a short TTL while a single-flight background refresh
//!   re-resolves the query on its own deadline
//! - **Miss**: the rest of the chain resolves, and a cacheable response is
//!   written through
//!
//! The chain is invoked on every query, hit or not, so later stages keep
//! observing traffic.
//!
//! ## Persistence
//!
//! With a dump file configured, the store is loaded at startup and
//! snapshotted periodically once enough entries changed, plus a final
//! snapshot on close. Three admin endpoints (`/flush`, `/dump`,
//! `/load_dump`) manipulate the store out of band.

use async_trait::async_trait;
use hickory_proto::op::Message;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub mod coalesce;
pub mod config;
pub mod context;
pub mod key;
pub mod metrics;
pub mod msgutil;
pub mod policy;

mod admin;
mod persist;

pub use self::coalesce::SingleFlight;
pub use self::config::{CacheConfig, ConfigError};
pub use self::context::{ChainWalker, QueryContext, Stage, StageError};
pub use self::key::{fingerprint, Fingerprint};
pub use self::metrics::CacheMetrics;

use persist::DnsStore;

/// Deadline for a background refresh. Deliberately not inherited from the
/// originating query's context, which may already be cancelled.
const LAZY_REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

/// The cache pipeline stage.
///
/// Cloning is cheap and shares the underlying store, metrics, and
/// background tasks.
#[derive(Clone)]
pub struct CacheStage {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) config: CacheConfig,
    pub(crate) store: Arc<DnsStore>,
    pub(crate) metrics: CacheMetrics,

    refresh: SingleFlight,
    changes: Arc<AtomicU64>,
    shutdown: broadcast::Sender<()>,
    closed: AtomicBool,
    dump_task: Mutex<Option<JoinHandle<()>>>,
}

impl CacheStage {
    /// Creates a cache stage.
    ///
    /// Loads the snapshot file when one is configured (a missing file is
    /// fine; a broken one is logged and the cache starts empty) and spawns
    /// the dump loop.
    pub async fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let store = Arc::new(DnsStore::new(config.size));
        let metrics = CacheMetrics::new(&config.tag);
        let (shutdown, _) = broadcast::channel(1);

        let inner = Arc::new(Inner {
            store,
            metrics,
            refresh: SingleFlight::new(),
            changes: Arc::new(AtomicU64::new(0)),
            shutdown,
            closed: AtomicBool::new(false),
            dump_task: Mutex::new(None),
            config,
        });

        if let Some(path) = inner.config.dump_file.clone() {
            match persist::load_snapshot(&inner.store, &path).await {
                Ok(0) => {}
                Ok(entries) => {
                    inner.metrics.set_size(inner.store.len());
                    info!(tag = %inner.config.tag, entries, "cache snapshot loaded");
                }
                Err(e) => warn!(
                    tag = %inner.config.tag,
                    path = %path.display(),
                    error = %e,
                    "failed to load cache snapshot, starting empty"
                ),
            }

            let task = tokio::spawn(persist::run_dump_loop(
                inner.store.clone(),
                inner.changes.clone(),
                path,
                Duration::from_secs(inner.config.dump_interval),
                inner.shutdown.subscribe(),
            ));
            *inner.dump_task.lock() = Some(task);
        }

        Ok(Self { inner })
    }

    /// Returns the stage's metrics.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.inner.metrics
    }

    /// Returns the current number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Builds the admin router (`/flush`, `/dump`, `/load_dump`) for this
    /// stage. The host mounts it under a prefix of its choosing.
    pub fn api_router(&self) -> axum::Router {
        admin::router(self.inner.clone())
    }

    /// Shuts the stage down: stops the dump loop, takes a final snapshot,
    /// and closes the store. Safe to call more than once.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.inner.shutdown.send(());
        let task = self.inner.dump_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        if let Some(path) = self.inner.config.dump_file.clone() {
            if let Err(e) = persist::write_snapshot(&self.inner.store, &path).await {
                error!(tag = %self.inner.config.tag, error = %e, "final cache snapshot failed");
            }
        }

        self.inner.store.close();
    }
}

impl Inner {
    /// Writes a response through to the store when policy allows.
    fn try_store(&self, key: &Fingerprint, response: &Message) {
        let Some(ttl) = policy::store_ttl(response, self.config.lazy_cache_ttl) else {
            return;
        };

        let mut cached = response.clone();
        msgutil::strip_edns(&mut cached);

        let now = SystemTime::now();
        if self.store.store(key.clone(), cached, now, now + ttl) {
            self.changes.fetch_add(1, Ordering::AcqRel);
            self.metrics.set_size(self.store.len());
        }
    }

    /// Re-resolves a stale entry in the background.
    ///
    /// Runs the rest of the chain on an independent task with a fresh
    /// deadline; the single-flight set keeps it to one refresh per key.
    fn spawn_refresh(self: &Arc<Self>, key: Fingerprint, qctx: QueryContext, next: ChainWalker) {
        let inner = Arc::clone(self);
        self.refresh.launch(key.clone(), async move {
            let mut qctx = qctx;
            debug!(tag = %inner.config.tag, key = ?key, "starting lazy refresh");

            match tokio::time::timeout(LAZY_REFRESH_TIMEOUT, next.next(&mut qctx)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(tag = %inner.config.tag, key = ?key, error = %e, "lazy refresh failed")
                }
                Err(_) => warn!(tag = %inner.config.tag, key = ?key, "lazy refresh timed out"),
            }

            if let Some(response) = qctx.response() {
                inner.try_store(&key, response);
            }
            debug!(tag = %inner.config.tag, key = ?key, "lazy refresh finished");
        });
    }
}

#[async_trait]
impl Stage for CacheStage {
    async fn execute(&self, qctx: &mut QueryContext, next: ChainWalker) -> context::Result<()> {
        let inner = &self.inner;
        inner.metrics.record_query();

        // No usable fingerprint: pass straight through with no caching
        // side effects.
        let Some(key) = key::fingerprint(qctx.query()) else {
            return next.next(qctx).await;
        };

        let mut served = false;
        // The store hands back entries regardless of expiry; whether one
        // is still usable is the policy's call alone.
        let decision = inner.store.get(&key).and_then(|(cached, stored_at, _)| {
            policy::serve_adjust(
                &cached,
                stored_at,
                SystemTime::now(),
                inner.config.lazy_cache_ttl,
                inner.config.lazy_cache_reply_ttl,
            )
        });

        if let Some((mut response, lazy)) = decision {
            if lazy {
                inner.metrics.record_lazy_hit();
                // The copy is taken before the response slot is filled,
                // so the refresh re-resolves a bare query.
                inner.spawn_refresh(key.clone(), qctx.clone(), next.clone());
            }

            response.set_id(qctx.query().id());
            msgutil::shuffle_addresses(&mut response);
            qctx.set_response(response);
            inner.metrics.record_hit();
            served = true;
        }

        // The rest of the chain runs on every query, served or not.
        let result = next.next(qctx).await;

        if !served {
            if let Some(response) = qctx.response() {
                inner.try_store(&key, response);
            }
        }

        result
    }
}
