//! Cache stage metrics.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for one cache stage instance.
///
/// Series are labeled with the stage's tag so multiple instances with
/// different configurations coexist. Atomic mirrors back the counters for
/// tests and admin introspection.
pub struct CacheMetrics {
    tag: String,

    query_total: AtomicU64,
    hit_total: AtomicU64,
    lazy_hit_total: AtomicU64,
}

impl CacheMetrics {
    /// Creates metrics for the stage identified by `tag`.
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            query_total: AtomicU64::new(0),
            hit_total: AtomicU64::new(0),
            lazy_hit_total: AtomicU64::new(0),
        }
    }

    /// Records a processed query.
    pub fn record_query(&self) {
        self.query_total.fetch_add(1, Ordering::Relaxed);
        counter!("cache_query_total", "tag" => self.tag.clone()).increment(1);
    }

    /// Records a query served from cache.
    pub fn record_hit(&self) {
        self.hit_total.fetch_add(1, Ordering::Relaxed);
        counter!("cache_hit_total", "tag" => self.tag.clone()).increment(1);
    }

    /// Records a query served from an expired entry.
    pub fn record_lazy_hit(&self) {
        self.lazy_hit_total.fetch_add(1, Ordering::Relaxed);
        counter!("cache_lazy_hit_total", "tag" => self.tag.clone()).increment(1);
    }

    /// Updates the cache size gauge.
    pub fn set_size(&self, size: usize) {
        gauge!("cache_size", "tag" => self.tag.clone()).set(size as f64);
    }

    /// Total queries processed.
    pub fn query_total(&self) -> u64 {
        self.query_total.load(Ordering::Relaxed)
    }

    /// Total queries served from cache.
    pub fn hit_total(&self) -> u64 {
        self.hit_total.load(Ordering::Relaxed)
    }

    /// Total queries served from expired entries.
    pub fn lazy_hit_total(&self) -> u64 {
        self.lazy_hit_total.load(Ordering::Relaxed)
    }
}
