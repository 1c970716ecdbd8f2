//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Manually driven clock.
///
/// Time only moves when a test moves it, which makes TTL expiry and pause
/// deadlines exact. The clock is an origin plus an offset; every clone
/// shares the offset, so advancing one clone advances every holder.
///
/// # Examples
///
/// ```ignore
/// use fetch_throttle::infrastructure::mocks::MockClock;
/// use fetch_throttle::TtlCache;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = MockClock::starting_now();
/// let cache = TtlCache::with_clock(Arc::new(clock.clone()));
///
/// cache.set("genres", vec!["Action"], Duration::from_secs(60));
/// assert!(cache.has(&"genres"));
///
/// clock.advance(Duration::from_secs(60));
/// assert!(!cache.has(&"genres"));
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a mock clock reading `origin`.
    pub fn new(origin: Instant) -> Self {
        Self {
            origin,
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Create a mock clock reading the real current instant.
    pub fn starting_now() -> Self {
        Self::new(Instant::now())
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        *self.offset() += duration;
    }

    /// Move the clock to `instant`. Instants before the origin clamp to it.
    pub fn set(&self, instant: Instant) {
        *self.offset() = instant.saturating_duration_since(self.origin);
    }

    /// Time advanced since the origin.
    pub fn elapsed(&self) -> Duration {
        *self.offset()
    }

    /// Instant the clock started at.
    pub fn origin(&self) -> Instant {
        self.origin
    }

    fn offset(&self) -> std::sync::MutexGuard<'_, Duration> {
        // A test that panicked mid-advance leaves a valid Duration behind.
        self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}
