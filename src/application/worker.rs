//! The queue actor.
//!
//! One task owns the pending requests, the rate window and the in-flight
//! attempt. Enqueues, attempt completions, counter ticks and scheduled
//! wake-ups all arrive through a single `select!` loop, so state is never
//! shared and at most one attempt is in flight.

use crate::application::config::QueueConfig;
use crate::application::metrics::Metrics;
use crate::application::ports::Clock;
use crate::application::queue::QueueError;
use crate::application::request::{priority_cmp, QueuedRequest, Work};
use crate::application::status::StatusPublisher;
use crate::domain::error::{ErrorClass, UpstreamError};
use crate::domain::key::RequestKey;
use crate::domain::status::QueueStatus;
use crate::domain::window::{Denial, RateWindow};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, QueueError>>;

/// Messages from queue handles to the worker.
pub(crate) enum Command<T> {
    Enqueue {
        key: RequestKey,
        work: Work<T>,
        reply: Reply<T>,
    },
    Shutdown,
}

struct InFlight<T> {
    request: QueuedRequest<T>,
    task: JoinHandle<Result<T, UpstreamError>>,
}

pub(crate) struct Worker<T> {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    window: RateWindow,
    pending: VecDeque<QueuedRequest<T>>,
    in_flight: Option<InFlight<T>>,
    /// Callers per key. A key is present while its request is queued or in flight.
    waiters: HashMap<RequestKey, Vec<Reply<T>>>,
    /// Earliest start of the next attempt, from the dispatch spacing
    not_before: Option<Instant>,
    wake_at: Option<Instant>,
    status: StatusPublisher,
    metrics: Metrics,
}

impl<T> Worker<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(
        config: QueueConfig,
        clock: Arc<dyn Clock>,
        status: StatusPublisher,
        metrics: Metrics,
    ) -> Self {
        Self {
            window: RateWindow::new(config.limits.clone())
                .with_spans(config.second_period, config.minute_period),
            config,
            clock,
            pending: VecDeque::new(),
            in_flight: None,
            waiters: HashMap::new(),
            not_before: None,
            wake_at: None,
            status,
            metrics,
        }
    }

    /// Process messages until shutdown or until every handle is gone.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command<T>>) {
        let start = tokio::time::Instant::now();
        let mut second = interval_at(start + self.config.second_period, self.config.second_period);
        second.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut minute = interval_at(start + self.config.minute_period, self.config.minute_period);
        minute.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            per_second = self.config.limits.per_second,
            per_minute = self.config.limits.per_minute,
            "request queue started"
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Enqueue { key, work, reply }) => self.on_enqueue(key, work, reply),
                    Some(Command::Shutdown) | None => break,
                },
                result = join_in_flight(&mut self.in_flight) => self.on_attempt(result),
                _ = second.tick() => self.on_second_tick(),
                _ = minute.tick() => self.on_minute_tick(),
                _ = sleep_until_opt(self.wake_at) => {
                    self.wake_at = None;
                    self.try_dispatch();
                }
            }
        }

        self.shutdown();
    }

    fn on_enqueue(&mut self, key: RequestKey, work: Work<T>, reply: Reply<T>) {
        if let Some(waiters) = self.waiters.get_mut(&key) {
            waiters.push(reply);
            self.metrics.record_deduplicated();
            debug!(key = %key, waiters = waiters.len(), "attached to pending request");
            return;
        }

        debug!(key = %key, queue_length = self.pending.len() + 1, "request enqueued");
        self.waiters.insert(key.clone(), vec![reply]);
        self.pending.push_back(QueuedRequest::new(key, work));
        self.metrics.record_enqueued();
        self.publish();
        self.try_dispatch();
    }

    /// Start the best ready request if the gate allows it.
    fn try_dispatch(&mut self) {
        if self.in_flight.is_some() || self.pending.is_empty() || self.window.is_paused() {
            return;
        }

        let now = self.clock.now();
        if let Some(not_before) = self.not_before {
            if now < not_before {
                self.schedule_wake(not_before);
                return;
            }
        }

        match self.window.check(now) {
            Ok(()) => {}
            Err(Denial::MinuteCeiling { paused_until }) => {
                warn!(
                    per_minute = self.config.limits.per_minute,
                    pause_ms = paused_until.saturating_duration_since(now).as_millis() as u64,
                    "per-minute ceiling reached, pausing queue"
                );
                self.publish();
                return;
            }
            Err(Denial::RollingWindow) => {
                if let Some(at) = self.window.rolling_ready_at(now) {
                    self.schedule_wake(at);
                }
                return;
            }
            // Lifted by the second ticker.
            Err(Denial::Paused | Denial::SecondCeiling) => return,
        }

        self.pending
            .make_contiguous()
            .sort_by(|a, b| priority_cmp(a, b, now));

        let Some(index) = self.pending.iter().position(|request| request.is_ready(now)) else {
            if let Some(at) = self.pending.iter().filter_map(QueuedRequest::ready_at).min() {
                debug!(
                    wait_ms = at.saturating_duration_since(now).as_millis() as u64,
                    "all queued requests are backing off"
                );
                self.schedule_wake(at);
            }
            return;
        };
        let Some(request) = self.pending.remove(index) else {
            return;
        };

        self.window.record_dispatch(now);
        self.metrics.record_dispatched();
        debug!(
            key = %request.key,
            attempt = request.attempt(),
            count_this_second = self.window.count_this_second(),
            count_this_minute = self.window.count_this_minute(),
            "dispatching request"
        );

        // The closure runs on the attempt task so a panic in it stays there.
        let work = Arc::clone(&request.work);
        let task = tokio::spawn(async move { work().await });
        self.in_flight = Some(InFlight { request, task });
        self.publish();
    }

    fn on_attempt(&mut self, result: Result<Result<T, UpstreamError>, JoinError>) {
        let Some(InFlight { request, .. }) = self.in_flight.take() else {
            return;
        };
        let now = self.clock.now();
        let outcome = result.unwrap_or_else(|e| {
            let reason = if e.is_panic() { "work panicked" } else { "work cancelled" };
            Err(UpstreamError::other(reason))
        });

        match outcome {
            Ok(value) => {
                debug!(key = %request.key, attempt = request.attempt(), "request succeeded");
                self.resolve(&request.key, Ok(value));
            }
            Err(err) => self.on_failure(request, err, now),
        }

        self.not_before = Some(now + self.config.dispatch_spacing);
        self.publish();
        if !self.window.is_paused() {
            self.try_dispatch();
        }
    }

    fn on_failure(&mut self, mut request: QueuedRequest<T>, err: UpstreamError, now: Instant) {
        let class = err.classify();
        if class == ErrorClass::RateLimit {
            self.metrics.record_rate_limited();
        }

        if !class.is_retryable() {
            error!(key = %request.key, attempt = request.attempt(), error = %err, "request failed");
            self.resolve(&request.key, Err(QueueError::Upstream(err)));
            return;
        }

        if request.retry_count >= self.config.max_retries {
            let attempts = request.attempt();
            error!(key = %request.key, attempts, error = %err, "request failed, retries exhausted");
            self.resolve(
                &request.key,
                Err(QueueError::RetriesExhausted { attempts, last: err }),
            );
            return;
        }

        let backoff = self
            .config
            .backoff
            .delay(request.retry_count.saturating_add(1), &mut rand::rng());
        request.record_failure(now, backoff);
        self.metrics.record_retried();
        warn!(
            key = %request.key,
            retry_count = request.retry_count,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "request failed, will retry"
        );

        if class == ErrorClass::RateLimit {
            let until = self.window.penalize(now, request.retry_count);
            warn!(
                key = %request.key,
                retry_count = request.retry_count,
                pause_ms = until.saturating_duration_since(now).as_millis() as u64,
                "upstream rate limit hit, pausing queue"
            );
        }

        self.pending.push_back(request);
    }

    fn on_second_tick(&mut self) {
        let now = self.clock.now();
        if self.window.on_second_tick(now) {
            info!(queue_length = self.pending.len(), "pause elapsed, resuming queue");
        }
        self.publish();
        self.try_dispatch();
    }

    fn on_minute_tick(&mut self) {
        self.window.on_minute_tick();
        self.publish();
        self.try_dispatch();
    }

    fn resolve(&mut self, key: &RequestKey, result: Result<T, QueueError>) {
        let Some(waiters) = self.waiters.remove(key) else {
            return;
        };
        let count = waiters.len() as u64;
        match &result {
            Ok(_) => self.metrics.record_succeeded(count),
            Err(_) => self.metrics.record_failed(count),
        }
        for waiter in waiters {
            // The caller may have stopped waiting.
            let _ = waiter.send(result.clone());
        }
    }

    fn schedule_wake(&mut self, at: Instant) {
        match self.wake_at {
            Some(current) if current <= at => {}
            _ => self.wake_at = Some(at),
        }
    }

    fn snapshot(&self) -> QueueStatus {
        QueueStatus {
            queue_length: self.pending.len(),
            is_dispatching: self.in_flight.is_some(),
            count_this_second: self.window.count_this_second(),
            count_this_minute: self.window.count_this_minute(),
            is_paused: self.window.is_paused(),
            paused_until: self.window.paused_until(),
        }
    }

    fn publish(&self) {
        self.status.publish(self.snapshot());
    }

    fn shutdown(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.task.abort();
        }
        self.pending.clear();
        self.wake_at = None;

        let mut rejected = 0usize;
        for (_, waiters) in self.waiters.drain() {
            for waiter in waiters {
                rejected += 1;
                let _ = waiter.send(Err(QueueError::Shutdown));
            }
        }
        if rejected > 0 {
            warn!(rejected, "request queue stopped with outstanding requests");
        } else {
            debug!("request queue stopped");
        }
        self.publish();
    }
}

async fn join_in_flight<T>(
    in_flight: &mut Option<InFlight<T>>,
) -> Result<Result<T, UpstreamError>, JoinError> {
    match in_flight {
        Some(in_flight) => (&mut in_flight.task).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
