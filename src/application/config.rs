//! Request queue configuration.

use crate::application::ports::Clock;
use crate::domain::backoff::{Backoff, BackoffError};
use crate::domain::window::RateLimits;
use std::sync::Arc;
use std::time::Duration;

/// Error returned when queue configuration validation fails.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Per-second ceiling must be greater than zero
    ZeroPerSecond,
    /// Per-minute ceiling must be greater than zero
    ZeroPerMinute,
    /// A counter reset period must be greater than zero
    ZeroPeriod {
        /// Which period was zero
        name: &'static str,
    },
    /// Backoff calculator configuration is invalid
    Backoff(BackoffError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroPerSecond => write!(f, "per_second must be greater than 0"),
            ConfigError::ZeroPerMinute => write!(f, "per_minute must be greater than 0"),
            ConfigError::ZeroPeriod { name } => write!(f, "{} must be greater than 0", name),
            ConfigError::Backoff(e) => write!(f, "backoff configuration error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Backoff(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackoffError> for ConfigError {
    fn from(e: BackoffError) -> Self {
        ConfigError::Backoff(e)
    }
}

/// Tunables of the request queue.
///
/// Defaults match a public API allowing 3 requests per second and 60 per
/// minute.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueConfig {
    /// Ceilings and pause durations of the admission gate
    pub limits: RateLimits,
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Minimum gap between the end of one attempt and the start of the next
    pub dispatch_spacing: Duration,
    /// Delay before a failed request becomes eligible again
    pub backoff: Backoff,
    /// Period of the second counter reset
    pub second_period: Duration,
    /// Period of the minute counter reset
    pub minute_period: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            limits: RateLimits::default(),
            max_retries: 5,
            dispatch_spacing: Duration::from_millis(350),
            backoff: Backoff::default(),
            second_period: Duration::from_secs(1),
            minute_period: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    /// Check the configuration for values the queue cannot run with.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.per_second == 0 {
            return Err(ConfigError::ZeroPerSecond);
        }
        if self.limits.per_minute == 0 {
            return Err(ConfigError::ZeroPerMinute);
        }
        if self.second_period.is_zero() {
            return Err(ConfigError::ZeroPeriod {
                name: "second_period",
            });
        }
        if self.minute_period.is_zero() {
            return Err(ConfigError::ZeroPeriod {
                name: "minute_period",
            });
        }
        if self.backoff.base().is_zero() {
            return Err(ConfigError::Backoff(BackoffError::ZeroBaseDelay));
        }
        let jitter = self.backoff.jitter();
        if !(jitter.start > 0.0 && jitter.start < jitter.end && jitter.end.is_finite()) {
            return Err(ConfigError::Backoff(BackoffError::InvalidJitter {
                min: jitter.start,
                max: jitter.end,
            }));
        }
        Ok(())
    }
}

/// Builder for [`RequestQueue`](crate::RequestQueue).
#[derive(Debug, Clone)]
pub struct QueueBuilder {
    config: QueueConfig,
    jitter: Option<(f64, f64)>,
    backoff_base: Option<Duration>,
    clock: Option<Arc<dyn Clock>>,
}

impl QueueBuilder {
    pub(crate) fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            jitter: None,
            backoff_base: None,
            clock: None,
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the per-second ceiling.
    pub fn with_per_second(mut self, per_second: u32) -> Self {
        self.config.limits.per_second = per_second;
        self
    }

    /// Set the per-minute ceiling.
    pub fn with_per_minute(mut self, per_minute: u32) -> Self {
        self.config.limits.per_minute = per_minute;
        self
    }

    /// Set the pause opened when the per-minute ceiling is hit.
    pub fn with_minute_pause(mut self, pause: Duration) -> Self {
        self.config.limits.minute_pause = pause;
        self
    }

    /// Set the base and cap of the pause opened by upstream rate-limit signals.
    pub fn with_rate_limit_penalty(mut self, base: Duration, cap: Duration) -> Self {
        self.config.limits.penalty_base = base;
        self.config.limits.penalty_cap = cap;
        self
    }

    /// Set how many retries follow the first attempt.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the minimum gap between consecutive attempts.
    pub fn with_dispatch_spacing(mut self, spacing: Duration) -> Self {
        self.config.dispatch_spacing = spacing;
        self
    }

    /// Set the base delay of the retry backoff.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = Some(base);
        self
    }

    /// Set the jitter range multiplied into every retry backoff.
    pub fn with_backoff_jitter(mut self, min: f64, max: f64) -> Self {
        self.jitter = Some((min, max));
        self
    }

    /// Set the counter reset periods. The rolling dispatch log is measured
    /// over the same periods.
    pub fn with_periods(mut self, second: Duration, minute: Duration) -> Self {
        self.config.second_period = second;
        self.config.minute_period = minute;
        self
    }

    /// Use a custom clock for timestamps.
    ///
    /// Timers always run on tokio's clock; the default `TokioClock` keeps
    /// timestamps in step with them, including under paused test time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate and return the configuration and clock.
    pub(crate) fn finish(self) -> Result<(QueueConfig, Option<Arc<dyn Clock>>), ConfigError> {
        let mut config = self.config;
        if let Some(base) = self.backoff_base {
            let max_delay = config.backoff.max_delay();
            let jitter = config.backoff.jitter();
            let mut backoff = Backoff::new(base)?.with_jitter(jitter.start, jitter.end)?;
            if let Some(max) = max_delay {
                backoff = backoff.with_max_delay(max);
            }
            config.backoff = backoff;
        }
        if let Some((min, max)) = self.jitter {
            config.backoff = config.backoff.with_jitter(min, max)?;
        }
        config.validate()?;
        Ok((config, self.clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.limits.per_second, 3);
        assert_eq!(config.limits.per_minute, 60);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.dispatch_spacing, Duration::from_millis(350));
        assert_eq!(config.backoff.base(), Duration::from_secs(2));
        assert_eq!(config.second_period, Duration::from_secs(1));
        assert_eq!(config.minute_period, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_ceilings_rejected() {
        let result = QueueBuilder::new().with_per_second(0).finish();
        assert!(matches!(result, Err(ConfigError::ZeroPerSecond)));

        let result = QueueBuilder::new().with_per_minute(0).finish();
        assert!(matches!(result, Err(ConfigError::ZeroPerMinute)));
    }

    #[test]
    fn test_zero_period_rejected() {
        let result = QueueBuilder::new()
            .with_periods(Duration::ZERO, Duration::from_secs(60))
            .finish();
        assert_eq!(
            result.unwrap_err(),
            ConfigError::ZeroPeriod {
                name: "second_period"
            }
        );
    }

    #[test]
    fn test_inverted_jitter_rejected() {
        let result = QueueBuilder::new().with_backoff_jitter(1.2, 0.8).finish();
        assert!(matches!(
            result,
            Err(ConfigError::Backoff(BackoffError::InvalidJitter { .. }))
        ));
    }

    #[test]
    fn test_zero_backoff_base_rejected() {
        let result = QueueBuilder::new()
            .with_backoff_base(Duration::ZERO)
            .finish();
        assert!(matches!(
            result,
            Err(ConfigError::Backoff(BackoffError::ZeroBaseDelay))
        ));
    }

    #[test]
    fn test_builder_overrides() {
        let (config, clock) = QueueBuilder::new()
            .with_per_second(5)
            .with_per_minute(100)
            .with_max_retries(2)
            .with_dispatch_spacing(Duration::from_millis(100))
            .with_backoff_base(Duration::from_millis(500))
            .with_backoff_jitter(1.0, 1.1)
            .finish()
            .unwrap();

        assert!(clock.is_none());
        assert_eq!(config.limits.per_second, 5);
        assert_eq!(config.limits.per_minute, 100);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.dispatch_spacing, Duration::from_millis(100));
        assert_eq!(config.backoff.base(), Duration::from_millis(500));
        assert_eq!(config.backoff.jitter(), 1.0..1.1);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            ConfigError::ZeroPerSecond.to_string(),
            "per_second must be greater than 0"
        );
        assert_eq!(
            ConfigError::ZeroPeriod {
                name: "minute_period"
            }
            .to_string(),
            "minute_period must be greater than 0"
        );
    }
}
