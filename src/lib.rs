//! # fetch-throttle
//!
//! Admission control, deduplication, retry and TTL caching for calls to a
//! rate-limited upstream API.
//!
//! Application code asks a [`CachedDispatcher`] for data by [`RequestKey`].
//! A cache hit returns immediately. A miss goes through the
//! [`RequestQueue`], which makes sure the upstream's limits are never
//! exceeded, runs identical concurrent requests once, retries transient
//! failures with exponential backoff, and pauses itself when the upstream
//! answers with a rate-limit signal. Callers only ever see one terminal
//! outcome per request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fetch_throttle::{CacheCategory, CachedDispatcher, RequestKey, RequestQueue, UpstreamError};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // 3 requests per second, 60 per minute, 5 retries
//! let queue = RequestQueue::<String>::builder().build()?;
//! let dispatcher = CachedDispatcher::new(queue);
//!
//! let key = RequestKey::new("anime").param("id", 1).build();
//! let title = dispatcher
//!     .fetch(CacheCategory::Details, key, || async {
//!         // One HTTP call; map failures onto UpstreamError
//!         Ok::<_, UpstreamError>("Cowboy Bebop".to_string())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## How admission works
//!
//! - **One in flight.** A single worker task owns the queue and runs at most
//!   one attempt at a time, with a minimum spacing (350 ms) between attempts.
//! - **Ceilings.** Per-second (3) and per-minute (60) counters gate every
//!   attempt. They are reset by two tickers; a rolling log of dispatch
//!   instants keeps the ceilings true for windows that straddle a reset.
//!   Reaching the minute ceiling pauses the queue for 10 seconds.
//! - **Penalty box.** An upstream rate-limit signal (HTTP 429) pauses the
//!   queue for 5 seconds, doubling per repeated signal up to 60 seconds.
//! - **Retries.** Rate-limit signals and transient failures (network
//!   errors, 5xx) are retried up to 5 times with `2s * 2^(n-1)` backoff and
//!   0.8-1.2 jitter. Client errors fail immediately.
//! - **Priority.** Fresh requests go before retries; among retries, those
//!   whose backoff has elapsed go first, then those retried fewer times.
//! - **Deduplication.** Enqueuing a key that is already queued or in flight
//!   attaches the caller to the existing request.
//!
//! ## Observing the queue
//!
//! ```rust,no_run
//! # use fetch_throttle::RequestQueue;
//! # #[tokio::main]
//! # async fn main() {
//! let queue = RequestQueue::<u32>::new();
//!
//! let subscription = queue.subscribe(|status| {
//!     println!("queue {}", status);
//! });
//!
//! let snapshot = queue.metrics().snapshot();
//! println!("hit rate {:.0}%", snapshot.cache_hit_rate() * 100.0);
//!
//! subscription.unsubscribe();
//! # }
//! ```
//!
//! ## Logging
//!
//! The crate logs through `tracing` and never installs a subscriber.
//! Dispatches, hits and misses are `debug`; retries and pauses are `warn`;
//! terminal failures are `error`.
//!
//! ## Feature flags
//!
//! - `serde`: `Serialize`/`Deserialize` for configuration types
//! - `http`: [`JsonFetcher`], a reqwest-based JSON producer
//! - `test-helpers`: `MockClock` for tests outside this crate

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    backoff::{random_delay, Backoff, BackoffError},
    error::{ErrorClass, UpstreamError, TOO_MANY_REQUESTS},
    key::{KeyBuilder, RequestKey},
    status::{QueuePhase, QueueStatus},
    window::{Denial, RateLimits, RateWindow},
};

pub use application::{
    cache::{CacheEntry, TtlCache, DEFAULT_TTL},
    config::{ConfigError, QueueBuilder, QueueConfig},
    dispatcher::{CacheCategory, CacheTtls, CachedDispatcher, PrefetchJob, PrefetchReport},
    metrics::{Metrics, MetricsSnapshot},
    ports::{Clock, Storage},
    queue::{Completion, QueueError, RequestQueue, ShutdownError},
    request::{Work, WorkFuture},
    status::{StatusBroadcaster, Subscription},
};

pub use infrastructure::{
    clock::{SystemClock, TokioClock},
    storage::ShardedStorage,
};

#[cfg(feature = "http")]
pub use infrastructure::http::JsonFetcher;
