//! Cache-first entry point for upstream reads.
//!
//! [`CachedDispatcher::fetch_cached`] answers from the cache when it can and
//! otherwise goes through the request queue, storing the result on success.
//! Failures are never cached.

use crate::application::cache::TtlCache;
use crate::application::queue::{QueueError, RequestQueue};
use crate::application::request::{into_work, Work};
use crate::domain::backoff::random_delay;
use crate::domain::error::UpstreamError;
use crate::domain::key::RequestKey;
use std::fmt::Debug;
use std::future::Future;
use std::ops::Range;
use std::time::Duration;
use tracing::{debug, warn};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Kinds of upstream data, grouped by how quickly they go stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CacheCategory {
    /// A single title's details
    Details,
    /// Ranked lists
    Top,
    /// Search results
    Search,
    /// Genre reference data
    Genres,
    /// Season listings
    Seasons,
    /// Character lists
    Characters,
    /// Related titles
    Related,
    /// Recommendations
    Recommendations,
    /// Anything else
    Default,
}

/// How long each [`CacheCategory`] stays cached.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheTtls {
    /// TTL for [`CacheCategory::Details`]
    pub details: Duration,
    /// TTL for [`CacheCategory::Top`]
    pub top: Duration,
    /// TTL for [`CacheCategory::Search`]
    pub search: Duration,
    /// TTL for [`CacheCategory::Genres`]
    pub genres: Duration,
    /// TTL for [`CacheCategory::Seasons`]
    pub seasons: Duration,
    /// TTL for [`CacheCategory::Characters`]
    pub characters: Duration,
    /// TTL for [`CacheCategory::Related`]
    pub related: Duration,
    /// TTL for [`CacheCategory::Recommendations`]
    pub recommendations: Duration,
    /// TTL for [`CacheCategory::Default`]
    pub default: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            details: DAY,
            top: 6 * HOUR,
            search: Duration::from_secs(30 * 60),
            genres: 7 * DAY,
            seasons: 7 * DAY,
            characters: DAY,
            related: DAY,
            recommendations: DAY,
            default: HOUR,
        }
    }
}

impl CacheTtls {
    /// TTL for `category`.
    pub fn ttl(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::Details => self.details,
            CacheCategory::Top => self.top,
            CacheCategory::Search => self.search,
            CacheCategory::Genres => self.genres,
            CacheCategory::Seasons => self.seasons,
            CacheCategory::Characters => self.characters,
            CacheCategory::Related => self.related,
            CacheCategory::Recommendations => self.recommendations,
            CacheCategory::Default => self.default,
        }
    }
}

/// One entry of a warm-up list for [`CachedDispatcher::prefetch`].
pub struct PrefetchJob<T> {
    key: RequestKey,
    ttl: Duration,
    work: Work<T>,
}

impl<T> PrefetchJob<T> {
    /// Load `key` with `producer` and cache it for `ttl`.
    pub fn new<F, Fut>(key: impl Into<RequestKey>, ttl: Duration, producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            ttl,
            work: into_work(producer),
        }
    }

    /// Key this job loads.
    pub fn key(&self) -> &RequestKey {
        &self.key
    }
}

impl<T> Debug for PrefetchJob<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchJob")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Outcome of a warm-up run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Keys fetched from the upstream and cached
    pub loaded: Vec<RequestKey>,
    /// Keys that were already cached
    pub cached: Vec<RequestKey>,
    /// Keys that failed, with their error
    pub failed: Vec<(RequestKey, QueueError)>,
}

impl PrefetchReport {
    /// Whether every job ended with a cached value.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Jobs processed.
    pub fn total(&self) -> usize {
        self.loaded.len() + self.cached.len() + self.failed.len()
    }
}

/// Cache in front of a request queue.
///
/// This is the entry point application code should use for upstream reads.
/// Direct cache access through [`cache`](CachedDispatcher::cache) bypasses
/// admission control and is meant for bookkeeping only.
///
/// # Example
/// ```
/// use fetch_throttle::{CacheCategory, CachedDispatcher, RequestKey, RequestQueue, UpstreamError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dispatcher = CachedDispatcher::new(RequestQueue::<Vec<String>>::new());
/// let key = RequestKey::new("genres/anime").build();
///
/// let genres = dispatcher
///     .fetch(CacheCategory::Genres, key.clone(), || async {
///         Ok::<_, UpstreamError>(vec!["Action".to_string(), "Drama".to_string()])
///     })
///     .await?;
///
/// assert_eq!(genres.len(), 2);
/// assert!(dispatcher.cache().has(&key));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CachedDispatcher<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    cache: TtlCache<RequestKey, T>,
    queue: RequestQueue<T>,
    ttls: CacheTtls,
}

impl<T> CachedDispatcher<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    /// Put a fresh cache in front of `queue`. The cache reads the queue's clock.
    pub fn new(queue: RequestQueue<T>) -> Self {
        let cache = TtlCache::with_clock(queue.clock());
        Self::with_cache(queue, cache)
    }

    /// Put an existing cache in front of `queue`.
    pub fn with_cache(queue: RequestQueue<T>, cache: TtlCache<RequestKey, T>) -> Self {
        Self {
            cache,
            queue,
            ttls: CacheTtls::default(),
        }
    }

    /// Replace the per-category TTL table.
    pub fn with_ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = ttls;
        self
    }

    /// Return the cached value for `key`, or fetch it through the queue and
    /// cache it for `ttl`.
    ///
    /// # Errors
    /// Returns the queue's terminal error. Nothing is cached on failure.
    pub async fn fetch_cached<F, Fut>(
        &self,
        key: impl Into<RequestKey>,
        ttl: Duration,
        producer: F,
    ) -> Result<T, QueueError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        self.fetch_work(key.into(), ttl, into_work(producer)).await
    }

    /// [`fetch_cached`](CachedDispatcher::fetch_cached) with the TTL of `category`.
    ///
    /// # Errors
    /// Returns the queue's terminal error. Nothing is cached on failure.
    pub async fn fetch<F, Fut>(
        &self,
        category: CacheCategory,
        key: impl Into<RequestKey>,
        producer: F,
    ) -> Result<T, QueueError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        let ttl = self.ttls.ttl(category);
        self.fetch_cached(key, ttl, producer).await
    }

    async fn fetch_work(&self, key: RequestKey, ttl: Duration, work: Work<T>) -> Result<T, QueueError> {
        let metrics = self.queue.metrics();
        if let Some(value) = self.cache.get(&key) {
            metrics.record_cache_hit();
            debug!(key = %key, "cache hit");
            return Ok(value);
        }

        metrics.record_cache_miss();
        debug!(key = %key, ttl_secs = ttl.as_secs(), "cache miss, queueing request");
        let value = self.queue.enqueue_work(key.clone(), work).await?;
        self.cache.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Load `jobs` one after another, pausing a random time from `stagger`
    /// between upstream calls.
    ///
    /// Keys already cached are skipped without a pause. A failed job does
    /// not stop the run.
    pub async fn prefetch(&self, jobs: Vec<PrefetchJob<T>>, stagger: Range<Duration>) -> PrefetchReport {
        let mut report = PrefetchReport::default();
        let total = jobs.len();
        let mut fetched_any = false;

        for (index, job) in jobs.into_iter().enumerate() {
            if self.cache.has(&job.key) {
                debug!(key = %job.key, "prefetch skipped, already cached");
                report.cached.push(job.key);
                continue;
            }
            if fetched_any {
                tokio::time::sleep(random_delay(stagger.clone())).await;
            }
            fetched_any = true;

            match self.fetch_work(job.key.clone(), job.ttl, job.work).await {
                Ok(_) => {
                    debug!(key = %job.key, step = index + 1, total, "prefetched");
                    report.loaded.push(job.key);
                }
                Err(e) => {
                    warn!(key = %job.key, step = index + 1, total, error = %e, "prefetch failed");
                    report.failed.push((job.key, e));
                }
            }
        }

        report
    }

    /// TTL configured for `category`.
    pub fn ttl(&self, category: CacheCategory) -> Duration {
        self.ttls.ttl(category)
    }

    /// The cache. Writes through it bypass admission control.
    pub fn cache(&self) -> &TtlCache<RequestKey, T> {
        &self.cache
    }

    /// The queue behind the cache.
    pub fn queue(&self) -> &RequestQueue<T> {
        &self.queue
    }
}

impl<T> Debug for CachedDispatcher<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedDispatcher")
            .field("cache", &self.cache)
            .field("queue", &self.queue)
            .finish()
    }
}
