//! Queue status snapshots.
//!
//! A [`QueueStatus`] is a read-only projection of the queue and its rate
//! window, recomputed whenever either changes and handed to observers.

use std::fmt;
use std::time::{Duration, Instant};

/// Coarse state of the queue, as a diagnostics overlay would show it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePhase {
    /// Nothing waiting and the gate is open
    Idle,
    /// Requests waiting or in flight
    Active,
    /// The gate is closed until a deadline
    Paused,
}

impl fmt::Display for QueuePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueuePhase::Idle => f.write_str("idle"),
            QueuePhase::Active => f.write_str("active"),
            QueuePhase::Paused => f.write_str("paused"),
        }
    }
}

/// Point-in-time view of the request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus {
    /// Requests waiting for dispatch (the in-flight one excluded)
    pub queue_length: usize,
    /// Whether a request is in flight
    pub is_dispatching: bool,
    /// Dispatches counted in the current second
    pub count_this_second: u32,
    /// Dispatches counted in the current minute
    pub count_this_minute: u32,
    /// Whether the admission gate is paused
    pub is_paused: bool,
    /// Deadline of the current or most recent pause
    pub paused_until: Option<Instant>,
}

impl QueueStatus {
    /// Coarse phase of the queue.
    pub fn phase(&self) -> QueuePhase {
        if self.is_paused {
            QueuePhase::Paused
        } else if self.queue_length > 0 || self.is_dispatching {
            QueuePhase::Active
        } else {
            QueuePhase::Idle
        }
    }

    /// Time left in the current pause, if paused.
    pub fn pause_remaining(&self, now: Instant) -> Option<Duration> {
        match (self.is_paused, self.paused_until) {
            (true, Some(until)) => Some(until.saturating_duration_since(now)),
            _ => None,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (queued: {}, in flight: {}, {}/s, {}/min)",
            self.phase(),
            self.queue_length,
            u8::from(self.is_dispatching),
            self.count_this_second,
            self.count_this_minute
        )
    }
}
