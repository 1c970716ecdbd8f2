//! Admission gate for outbound dispatches.
//!
//! Two independent axes decide whether a dispatch may start:
//!
//! - **Window counters** count dispatches in the current second and minute.
//!   They are reset by the owner's periodic tickers, not by this type.
//! - **Pause state** closes the gate until a deadline. It opens when the
//!   minute ceiling is hit and when the upstream answers with a rate-limit
//!   signal, escalating with repeated signals.
//!
//! Alongside the counters the window keeps a short log of dispatch instants
//! so that the ceilings also hold for windows straddling a counter reset.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Ceilings and pause durations applied by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimits {
    /// Maximum dispatches per second
    pub per_second: u32,
    /// Maximum dispatches per minute
    pub per_minute: u32,
    /// Pause opened when the minute ceiling is reached
    pub minute_pause: Duration,
    /// Pause after the first upstream rate-limit signal; doubles per repeat
    pub penalty_base: Duration,
    /// Longest pause a rate-limit signal can open
    pub penalty_cap: Duration,
    /// Second counter value forced by a repeated rate-limit signal
    pub penalty_second_count: u32,
    /// Minute counter floor forced by a repeated rate-limit signal
    pub penalty_minute_floor: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_second: 3,
            per_minute: 60,
            minute_pause: Duration::from_secs(10),
            penalty_base: Duration::from_secs(5),
            penalty_cap: Duration::from_secs(60),
            penalty_second_count: 2,
            penalty_minute_floor: 50,
        }
    }
}

impl RateLimits {
    /// Pause opened by a rate-limit signal on retry number `retry_count`.
    pub fn penalty(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(16);
        self.penalty_base
            .saturating_mul(1u32 << exponent)
            .min(self.penalty_cap)
    }
}

/// Reason a dispatch was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// The gate is paused
    Paused,
    /// The per-second ceiling is saturated
    SecondCeiling,
    /// The per-minute ceiling is saturated; the gate has been paused
    MinuteCeiling {
        /// When the freshly opened pause ends
        paused_until: Instant,
    },
    /// Counters have headroom but the rolling log does not
    RollingWindow,
}

/// Counters, pause state and dispatch log for one upstream.
#[derive(Debug, Clone)]
pub struct RateWindow {
    limits: RateLimits,
    count_this_second: u32,
    count_this_minute: u32,
    paused: bool,
    paused_until: Option<Instant>,
    recent: VecDeque<Instant>,
    second_span: Duration,
    minute_span: Duration,
}

impl RateWindow {
    /// Create an open window with zeroed counters.
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            count_this_second: 0,
            count_this_minute: 0,
            paused: false,
            paused_until: None,
            recent: VecDeque::new(),
            second_span: SECOND,
            minute_span: MINUTE,
        }
    }

    /// Measure the rolling log over `second` and `minute` instead of one
    /// second and one minute. Owners that reset the counters on other
    /// periods pass the same periods here.
    pub fn with_spans(mut self, second: Duration, minute: Duration) -> Self {
        self.second_span = second;
        self.minute_span = minute;
        self
    }

    /// Ask whether a dispatch may start at `now`.
    ///
    /// Does not record anything on success; call [`record_dispatch`] once the
    /// dispatch really starts. Hitting the minute ceiling opens a pause.
    ///
    /// [`record_dispatch`]: RateWindow::record_dispatch
    pub fn check(&mut self, now: Instant) -> Result<(), Denial> {
        if self.paused {
            return Err(Denial::Paused);
        }
        if self.count_this_second >= self.limits.per_second {
            return Err(Denial::SecondCeiling);
        }
        if self.count_this_minute >= self.limits.per_minute {
            let paused_until = self.pause_for(now, self.limits.minute_pause);
            return Err(Denial::MinuteCeiling { paused_until });
        }

        self.expire(now);
        let last_second = self
            .recent
            .iter()
            .rev()
            .take_while(|at| now.saturating_duration_since(**at) < self.second_span)
            .count();
        if last_second >= self.limits.per_second as usize
            || self.recent.len() >= self.limits.per_minute as usize
        {
            return Err(Denial::RollingWindow);
        }

        Ok(())
    }

    /// Count a dispatch that started at `now`.
    pub fn record_dispatch(&mut self, now: Instant) {
        self.count_this_second = self.count_this_second.saturating_add(1);
        self.count_this_minute = self.count_this_minute.saturating_add(1);
        self.recent.push_back(now);
        self.expire(now);
    }

    /// Second ticker: zero the second counter and lift an elapsed pause.
    ///
    /// Returns `true` if a pause was lifted.
    pub fn on_second_tick(&mut self, now: Instant) -> bool {
        self.count_this_second = 0;
        self.resume_if_elapsed(now)
    }

    /// Minute ticker: zero the minute counter.
    pub fn on_minute_tick(&mut self) {
        self.count_this_minute = 0;
    }

    /// Lift the pause if its deadline has passed.
    pub fn resume_if_elapsed(&mut self, now: Instant) -> bool {
        match self.paused_until {
            Some(until) if self.paused && now > until => {
                self.paused = false;
                true
            }
            _ => false,
        }
    }

    /// Close the gate for `duration` starting at `now`. Replaces any earlier deadline.
    pub fn pause_for(&mut self, now: Instant, duration: Duration) -> Instant {
        let until = now + duration;
        self.paused = true;
        self.paused_until = Some(until);
        until
    }

    /// Apply the penalty for an upstream rate-limit signal on retry `retry_count`.
    ///
    /// Repeated signals (`retry_count > 1`) also push the counters towards
    /// their ceilings so the gate stays cautious after resuming.
    pub fn penalize(&mut self, now: Instant, retry_count: u32) -> Instant {
        let until = self.pause_for(now, self.limits.penalty(retry_count));
        if retry_count > 1 {
            self.count_this_second = self.limits.penalty_second_count;
            self.count_this_minute = self.count_this_minute.max(self.limits.penalty_minute_floor);
        }
        until
    }

    /// Earliest instant at which the rolling log admits another dispatch.
    ///
    /// Returns `None` if the log already has headroom at `now`.
    pub fn rolling_ready_at(&self, now: Instant) -> Option<Instant> {
        let per_second = self.limits.per_second as usize;
        let per_minute = self.limits.per_minute as usize;

        let in_last_second: Vec<Instant> = self
            .recent
            .iter()
            .copied()
            .filter(|at| now.saturating_duration_since(*at) < self.second_span)
            .collect();
        let second_ready = (per_second > 0 && in_last_second.len() >= per_second)
            .then(|| in_last_second[in_last_second.len() - per_second] + self.second_span);

        let in_last_minute: Vec<Instant> = self
            .recent
            .iter()
            .copied()
            .filter(|at| now.saturating_duration_since(*at) < self.minute_span)
            .collect();
        let minute_ready = (per_minute > 0 && in_last_minute.len() >= per_minute)
            .then(|| in_last_minute[in_last_minute.len() - per_minute] + self.minute_span);

        second_ready.max(minute_ready)
    }

    /// Dispatches counted in the current second.
    pub fn count_this_second(&self) -> u32 {
        self.count_this_second
    }

    /// Dispatches counted in the current minute.
    pub fn count_this_minute(&self) -> u32 {
        self.count_this_minute
    }

    /// Whether the gate is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Deadline of the current or most recent pause.
    pub fn paused_until(&self) -> Option<Instant> {
        self.paused_until
    }

    /// Configured ceilings.
    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.recent.front() {
            if now.saturating_duration_since(oldest) >= self.minute_span.max(self.second_span) {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> RateWindow {
        RateWindow::new(RateLimits::default())
    }

    #[test]
    fn test_rolling_log_follows_spans() {
        let start = Instant::now();
        let at = |ms: u64| start + Duration::from_millis(ms);
        let mut window =
            window().with_spans(Duration::from_millis(500), Duration::from_secs(5));

        for ms in [0, 100, 200] {
            window.record_dispatch(at(ms));
        }
        window.on_second_tick(at(300));

        assert_eq!(window.check(at(400)), Err(Denial::RollingWindow));
        assert_eq!(window.rolling_ready_at(at(400)), Some(at(500)));
        assert_eq!(window.check(at(500)), Ok(()));
    }

    #[test]
    fn test_second_ceiling() {
        let mut window = window();
        let now = Instant::now();

        for _ in 0..3 {
            assert_eq!(window.check(now), Ok(()));
            window.record_dispatch(now);
        }
        assert_eq!(window.check(now), Err(Denial::SecondCeiling));
        assert_eq!(window.count_this_second(), 3);
        assert_eq!(window.count_this_minute(), 3);
    }

    #[test]
    fn test_second_tick_resets_counter_only() {
        let mut window = window();
        let start = Instant::now();

        for _ in 0..3 {
            window.record_dispatch(start);
        }
        let later = start + Duration::from_millis(1000);
        assert!(!window.on_second_tick(later));
        assert_eq!(window.count_this_second(), 0);
        assert_eq!(window.count_this_minute(), 3);
        assert_eq!(window.check(later), Ok(()));
    }

    #[test]
    fn test_rolling_log_guards_tick_boundary() {
        let mut window = window();
        let start = Instant::now();

        for offset in [900, 950, 990] {
            window.record_dispatch(start + Duration::from_millis(offset));
        }
        let tick = start + Duration::from_millis(1000);
        window.on_second_tick(tick);

        // Counters are clear but three dispatches happened in the last second.
        assert_eq!(window.check(tick), Err(Denial::RollingWindow));
        assert_eq!(window.check(start + Duration::from_millis(1900)), Ok(()));
    }

    #[test]
    fn test_rolling_ready_at() {
        let mut window = window();
        let start = Instant::now();
        assert_eq!(window.rolling_ready_at(start), None);

        for offset in [900, 950, 990] {
            window.record_dispatch(start + Duration::from_millis(offset));
        }
        let tick = start + Duration::from_millis(1000);
        assert_eq!(
            window.rolling_ready_at(tick),
            Some(start + Duration::from_millis(1900))
        );
        assert_eq!(window.rolling_ready_at(start + Duration::from_millis(1900)), None);
    }

    #[test]
    fn test_minute_ceiling_opens_pause() {
        let mut window = window();
        let start = Instant::now();

        for i in 0..60u64 {
            let at = start + Duration::from_millis(i * 400);
            window.on_second_tick(at);
            assert_eq!(window.check(at), Ok(()), "dispatch {} should be admitted", i);
            window.record_dispatch(at);
        }

        let now = start + Duration::from_secs(30);
        window.on_second_tick(now);
        assert_eq!(
            window.check(now),
            Err(Denial::MinuteCeiling {
                paused_until: now + Duration::from_secs(10)
            })
        );
        assert!(window.is_paused());
        assert_eq!(window.check(now), Err(Denial::Paused));
    }

    #[test]
    fn test_pause_lifts_strictly_after_deadline() {
        let mut window = window();
        let now = Instant::now();
        let until = window.pause_for(now, Duration::from_secs(5));

        assert!(!window.resume_if_elapsed(until));
        assert!(window.is_paused());
        assert!(window.on_second_tick(until + Duration::from_millis(1)));
        assert!(!window.is_paused());
        assert_eq!(window.paused_until(), Some(until));
    }

    #[test]
    fn test_penalty_schedule() {
        let limits = RateLimits::default();
        assert_eq!(limits.penalty(1), Duration::from_secs(5));
        assert_eq!(limits.penalty(2), Duration::from_secs(10));
        assert_eq!(limits.penalty(3), Duration::from_secs(20));
        assert_eq!(limits.penalty(4), Duration::from_secs(40));
        assert_eq!(limits.penalty(5), Duration::from_secs(60));
        assert_eq!(limits.penalty(30), Duration::from_secs(60));
    }

    #[test]
    fn test_first_penalty_keeps_counters() {
        let mut window = window();
        let now = Instant::now();
        window.record_dispatch(now);

        let until = window.penalize(now, 1);
        assert_eq!(until, now + Duration::from_secs(5));
        assert!(window.is_paused());
        assert_eq!(window.count_this_second(), 1);
        assert_eq!(window.count_this_minute(), 1);
    }

    #[test]
    fn test_repeated_penalty_clamps_counters() {
        let mut window = window();
        let now = Instant::now();
        window.record_dispatch(now);

        let until = window.penalize(now, 2);
        assert_eq!(until, now + Duration::from_secs(10));
        assert_eq!(window.count_this_second(), 2);
        assert_eq!(window.count_this_minute(), 50);

        for _ in 0..5 {
            window.record_dispatch(now);
        }
        window.penalize(now, 3);
        assert_eq!(window.count_this_minute(), 55);
    }
}
