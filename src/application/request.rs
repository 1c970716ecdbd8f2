//! Queue entries and their dispatch order.

use crate::domain::error::UpstreamError;
use crate::domain::key::RequestKey;
use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Future returned by one attempt of a unit of work.
pub type WorkFuture<T> = Pin<Box<dyn Future<Output = Result<T, UpstreamError>> + Send>>;

/// Repeatable unit of work. Every call starts a fresh attempt.
pub type Work<T> = Arc<dyn Fn() -> WorkFuture<T> + Send + Sync>;

/// Erase a closure into a [`Work`].
pub(crate) fn into_work<T, F, Fut>(work: F) -> Work<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
{
    Arc::new(move || -> WorkFuture<T> { Box::pin(work()) })
}

/// A request waiting in the queue.
///
/// Created on enqueue, updated in place on each retry, dropped on its
/// terminal outcome.
pub(crate) struct QueuedRequest<T> {
    pub(crate) key: RequestKey,
    pub(crate) work: Work<T>,
    /// Attempts already retried (0 = never failed)
    pub(crate) retry_count: u32,
    /// When the most recent failed attempt ended
    pub(crate) last_attempt_at: Option<Instant>,
    /// Backoff drawn when the most recent attempt failed
    pub(crate) backoff: Duration,
}

impl<T> QueuedRequest<T> {
    pub(crate) fn new(key: RequestKey, work: Work<T>) -> Self {
        Self {
            key,
            work,
            retry_count: 0,
            last_attempt_at: None,
            backoff: Duration::ZERO,
        }
    }

    /// Number of the next attempt, starting at 1.
    pub(crate) fn attempt(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Instant the backoff ends, or `None` for a fresh request.
    pub(crate) fn ready_at(&self) -> Option<Instant> {
        self.last_attempt_at.map(|at| at + self.backoff)
    }

    /// Whether the request may be attempted at `now`.
    pub(crate) fn is_ready(&self, now: Instant) -> bool {
        match self.ready_at() {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// Record a failed attempt that ended at `now`.
    pub(crate) fn record_failure(&mut self, now: Instant, backoff: Duration) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_attempt_at = Some(now);
        self.backoff = backoff;
    }
}

impl<T> fmt::Debug for QueuedRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("key", &self.key)
            .field("retry_count", &self.retry_count)
            .field("last_attempt_at", &self.last_attempt_at)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Dispatch order at `now`.
///
/// Fresh requests come before retried ones. Among retried requests, those
/// whose backoff has elapsed come first, then fewer retries first. Ties keep
/// their queue order when used with a stable sort.
pub(crate) fn priority_cmp<T>(a: &QueuedRequest<T>, b: &QueuedRequest<T>, now: Instant) -> Ordering {
    match (a.retry_count == 0, b.retry_count == 0) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => b
            .is_ready(now)
            .cmp(&a.is_ready(now))
            .then(a.retry_count.cmp(&b.retry_count)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str) -> QueuedRequest<u32> {
        QueuedRequest::new(RequestKey::from(key), into_work(|| async { Ok(1) }))
    }

    fn retried(key: &str, retry_count: u32, failed_at: Instant, backoff: Duration) -> QueuedRequest<u32> {
        let mut request = request(key);
        request.retry_count = retry_count;
        request.last_attempt_at = Some(failed_at);
        request.backoff = backoff;
        request
    }

    fn order(mut requests: Vec<QueuedRequest<u32>>, now: Instant) -> Vec<String> {
        requests.sort_by(|a, b| priority_cmp(a, b, now));
        requests.into_iter().map(|r| r.key.into_string()).collect()
    }

    #[test]
    fn test_fresh_request_is_ready() {
        let request = request("a");
        assert!(request.is_ready(Instant::now()));
        assert_eq!(request.ready_at(), None);
        assert_eq!(request.attempt(), 1);
    }

    #[test]
    fn test_readiness_follows_stored_backoff() {
        let now = Instant::now();
        let mut request = request("a");
        request.record_failure(now, Duration::from_secs(2));

        assert_eq!(request.retry_count, 1);
        assert_eq!(request.attempt(), 2);
        assert!(!request.is_ready(now + Duration::from_millis(1999)));
        assert!(request.is_ready(now + Duration::from_secs(2)));
    }

    #[test]
    fn test_fresh_before_retried() {
        let now = Instant::now();
        let past = now - Duration::from_secs(10);
        let requests = vec![
            retried("retry", 1, past, Duration::from_secs(1)),
            request("fresh"),
        ];

        assert_eq!(order(requests, now), vec!["fresh", "retry"]);
    }

    #[test]
    fn test_ready_retry_before_waiting_retry() {
        let now = Instant::now();
        let requests = vec![
            retried("waiting", 1, now, Duration::from_secs(2)),
            retried("ready", 3, now - Duration::from_secs(20), Duration::from_secs(8)),
        ];

        assert_eq!(order(requests, now), vec!["ready", "waiting"]);
    }

    #[test]
    fn test_fewer_retries_first_when_equally_ready() {
        let now = Instant::now();
        let past = now - Duration::from_secs(60);
        let requests = vec![
            retried("three", 3, past, Duration::from_secs(8)),
            retried("one", 1, past, Duration::from_secs(2)),
            retried("two", 2, past, Duration::from_secs(4)),
        ];

        assert_eq!(order(requests, now), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_fresh_requests_keep_queue_order() {
        let now = Instant::now();
        let requests = vec![request("first"), request("second"), request("third")];

        assert_eq!(order(requests, now), vec!["first", "second", "third"]);
    }
}
