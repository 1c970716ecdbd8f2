//! Counters for queue and cache activity.
//!
//! Cheap enough to leave on in production; every update is one relaxed
//! atomic add.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared counters describing what the queue and cache have done.
///
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Requests accepted as new queue entries
    enqueued: AtomicU64,
    /// Requests attached to an entry already queued or in flight
    deduplicated: AtomicU64,
    /// Attempts started against the upstream
    dispatched: AtomicU64,
    /// Failed attempts put back in the queue
    retried: AtomicU64,
    /// Rate-limit signals received from the upstream
    rate_limited: AtomicU64,
    /// Requests resolved with a value
    succeeded: AtomicU64,
    /// Requests rejected with an error
    failed: AtomicU64,
    /// Cached lookups served without touching the queue
    cache_hits: AtomicU64,
    /// Cached lookups that went to the queue
    cache_misses: AtomicU64,
}

impl Metrics {
    /// Create a zeroed set of counters.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub(crate) fn record_enqueued(&self) {
        self.inner.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deduplicated(&self) {
        self.inner.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.inner.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retried(&self) {
        self.inner.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limited(&self) {
        self.inner.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Count `waiters` callers resolved with a value.
    pub(crate) fn record_succeeded(&self, waiters: u64) {
        self.inner.succeeded.fetch_add(waiters, Ordering::Relaxed);
    }

    /// Count `waiters` callers rejected with an error.
    pub(crate) fn record_failed(&self, waiters: u64) {
        self.inner.failed.fetch_add(waiters, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests accepted as new queue entries.
    pub fn enqueued(&self) -> u64 {
        self.inner.enqueued.load(Ordering::Relaxed)
    }

    /// Requests attached to an existing entry.
    pub fn deduplicated(&self) -> u64 {
        self.inner.deduplicated.load(Ordering::Relaxed)
    }

    /// Attempts started against the upstream.
    pub fn dispatched(&self) -> u64 {
        self.inner.dispatched.load(Ordering::Relaxed)
    }

    /// Failed attempts put back in the queue.
    pub fn retried(&self) -> u64 {
        self.inner.retried.load(Ordering::Relaxed)
    }

    /// Rate-limit signals received.
    pub fn rate_limited(&self) -> u64 {
        self.inner.rate_limited.load(Ordering::Relaxed)
    }

    /// Callers resolved with a value.
    pub fn succeeded(&self) -> u64 {
        self.inner.succeeded.load(Ordering::Relaxed)
    }

    /// Callers rejected with an error.
    pub fn failed(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Cached lookups served from the cache.
    pub fn cache_hits(&self) -> u64 {
        self.inner.cache_hits.load(Ordering::Relaxed)
    }

    /// Cached lookups that missed.
    pub fn cache_misses(&self) -> u64 {
        self.inner.cache_misses.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued(),
            deduplicated: self.deduplicated(),
            dispatched: self.dispatched(),
            retried: self.retried(),
            rate_limited: self.rate_limited(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
        }
    }

    /// Reset all counters to zero.
    ///
    /// Useful for testing or when starting a new monitoring period.
    pub fn reset(&self) {
        let inner = &self.inner;
        for counter in [
            &inner.enqueued,
            &inner.deduplicated,
            &inner.dispatched,
            &inner.retried,
            &inner.rate_limited,
            &inner.succeeded,
            &inner.failed,
            &inner.cache_hits,
            &inner.cache_misses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    /// Requests accepted as new queue entries
    pub enqueued: u64,
    /// Requests attached to an existing entry
    pub deduplicated: u64,
    /// Attempts started against the upstream
    pub dispatched: u64,
    /// Failed attempts put back in the queue
    pub retried: u64,
    /// Rate-limit signals received
    pub rate_limited: u64,
    /// Callers resolved with a value
    pub succeeded: u64,
    /// Callers rejected with an error
    pub failed: u64,
    /// Cached lookups served from the cache
    pub cache_hits: u64,
    /// Cached lookups that missed
    pub cache_misses: u64,
}

impl MetricsSnapshot {
    /// Fraction of cached lookups served from the cache (0.0 to 1.0).
    ///
    /// Returns 0.0 if no cached lookups have happened.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits.saturating_add(self.cache_misses);
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Upstream calls avoided by deduplication and caching.
    pub fn calls_saved(&self) -> u64 {
        self.deduplicated.saturating_add(self.cache_hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initial_state() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_record_counters() {
        let metrics = Metrics::new();
        metrics.record_enqueued();
        metrics.record_enqueued();
        metrics.record_deduplicated();
        metrics.record_dispatched();
        metrics.record_retried();
        metrics.record_rate_limited();
        metrics.record_succeeded(3);
        metrics.record_failed(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.enqueued, 2);
        assert_eq!(snapshot.deduplicated, 1);
        assert_eq!(snapshot.dispatched, 1);
        assert_eq!(snapshot.retried, 1);
        assert_eq!(snapshot.rate_limited, 1);
        assert_eq!(snapshot.succeeded, 3);
        assert_eq!(snapshot.failed, 1);
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().cache_hit_rate(), 0.0);

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();

        assert_eq!(metrics.snapshot().cache_hit_rate(), 0.75);
    }

    #[test]
    fn test_calls_saved() {
        let metrics = Metrics::new();
        metrics.record_deduplicated();
        metrics.record_cache_hit();
        metrics.record_cache_hit();

        assert_eq!(metrics.snapshot().calls_saved(), 3);
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new();
        metrics.record_enqueued();
        metrics.record_cache_miss();
        metrics.reset();

        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_dispatched();

        assert_eq!(metrics.dispatched(), 1);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::thread;

        let metrics = Metrics::new();
        let mut handles = vec![];
        for _ in 0..10 {
            let metrics = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    metrics.record_enqueued();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.enqueued(), 1000);
    }
}
