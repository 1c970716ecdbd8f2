//! Retry backoff calculation.
//!
//! A retried request waits `base * 2^(retry_count - 1) * jitter` before it is
//! eligible again, where `jitter` is drawn uniformly from a configurable
//! half-open range. The calculation itself is pure: callers either pass the
//! jitter factor explicitly or hand in a random source.

use rand::Rng;
use std::ops::Range;
use std::time::Duration;

/// Largest exponent applied to the base delay. Beyond this the delay
/// saturates instead of overflowing.
const MAX_EXPONENT: u32 = 32;

/// Error returned when a backoff calculator is configured with invalid values.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffError {
    /// Base delay must be greater than zero
    ZeroBaseDelay,
    /// Jitter range must be finite, positive and non-empty
    InvalidJitter {
        /// Lower bound (inclusive)
        min: f64,
        /// Upper bound (exclusive)
        max: f64,
    },
}

impl std::fmt::Display for BackoffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackoffError::ZeroBaseDelay => write!(f, "backoff base delay must be greater than 0"),
            BackoffError::InvalidJitter { min, max } => {
                write!(f, "jitter range [{}, {}) must be positive and non-empty", min, max)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

/// Exponential backoff calculator with multiplicative jitter.
///
/// # Example
/// ```
/// use fetch_throttle::Backoff;
/// use std::time::Duration;
///
/// let backoff = Backoff::default();
///
/// // First retry uses exponent 0: 2s * 1.0
/// assert_eq!(backoff.delay_with_factor(1, 1.0), Duration::from_secs(2));
/// // Third retry: 2s * 4 * 0.8
/// assert_eq!(backoff.delay_with_factor(3, 0.8), Duration::from_millis(6400));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Backoff {
    base: Duration,
    jitter_min: f64,
    jitter_max: f64,
    max_delay: Option<Duration>,
}

impl Default for Backoff {
    /// 2 second base, jitter in `[0.8, 1.2)`, no ceiling.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            jitter_min: 0.8,
            jitter_max: 1.2,
            max_delay: None,
        }
    }
}

impl Backoff {
    /// Create a calculator with the given base delay and the default jitter range.
    ///
    /// # Errors
    /// Returns `BackoffError::ZeroBaseDelay` if `base` is zero.
    pub fn new(base: Duration) -> Result<Self, BackoffError> {
        if base.is_zero() {
            return Err(BackoffError::ZeroBaseDelay);
        }
        Ok(Self {
            base,
            ..Self::default()
        })
    }

    /// Replace the jitter range. `min` is inclusive, `max` exclusive.
    ///
    /// # Errors
    /// Returns `BackoffError::InvalidJitter` unless `0 < min < max` and both are finite.
    pub fn with_jitter(mut self, min: f64, max: f64) -> Result<Self, BackoffError> {
        if !(min.is_finite() && max.is_finite() && min > 0.0 && min < max) {
            return Err(BackoffError::InvalidJitter { min, max });
        }
        self.jitter_min = min;
        self.jitter_max = max;
        Ok(self)
    }

    /// Cap every computed delay at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Base delay applied to the first retry.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Jitter range as `min..max`.
    pub fn jitter(&self) -> Range<f64> {
        self.jitter_min..self.jitter_max
    }

    /// Optional ceiling on computed delays.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Delay before retry number `retry_count` for an explicit jitter factor.
    ///
    /// `retry_count` is 1-indexed; 0 is treated like 1.
    pub fn delay_with_factor(&self, retry_count: u32, factor: f64) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(MAX_EXPONENT);
        let millis = self.base.as_secs_f64() * 1000.0 * 2f64.powi(exponent as i32) * factor;
        // Whole milliseconds, like a timer API would take them.
        let delay = Duration::try_from_secs_f64(millis.floor().max(0.0) / 1000.0)
            .unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Delay before retry number `retry_count`, drawing jitter from `rng`.
    pub fn delay<R: Rng + ?Sized>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let factor = rng.random_range(self.jitter_min..self.jitter_max);
        self.delay_with_factor(retry_count, factor)
    }

    /// Upper bound on the delay for `retry_count`, ignoring randomness.
    pub fn max_delay_for(&self, retry_count: u32) -> Duration {
        self.delay_with_factor(retry_count, self.jitter_max)
    }
}

/// Uniformly random delay within `range`, used to stagger background work.
///
/// An empty range yields its start.
pub fn random_delay(range: Range<Duration>) -> Duration {
    if range.start >= range.end {
        return range.start;
    }
    rand::rng().random_range(range)
}
