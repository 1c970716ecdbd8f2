//! Public handle of the request queue.
//!
//! The queue admits requests to a rate-limited upstream, deduplicates
//! identical requests, retries transient failures with backoff, and pauses
//! itself when the upstream signals a rate-limit breach. All state lives in
//! a background worker task; [`RequestQueue`] is a cheap, cloneable handle
//! that talks to it over a channel.

use crate::application::config::{ConfigError, QueueBuilder, QueueConfig};
use crate::application::metrics::Metrics;
use crate::application::ports::Clock;
use crate::application::request::{into_work, Work};
use crate::application::status::{self, StatusBroadcaster, Subscription};
use crate::application::worker::{Command, Worker};
use crate::domain::error::UpstreamError;
use crate::domain::key::RequestKey;
use crate::domain::status::QueueStatus;
use crate::infrastructure::clock::TokioClock;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Terminal failure of a queued request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The work failed with an error that is not worth retrying
    Upstream(UpstreamError),
    /// Every allowed attempt failed
    RetriesExhausted {
        /// Attempts made, the first one included
        attempts: u32,
        /// Error of the final attempt
        last: UpstreamError,
    },
    /// The queue stopped before the request finished
    Shutdown,
}

impl QueueError {
    /// Upstream error behind this failure, if any.
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            QueueError::Upstream(e) => Some(e),
            QueueError::RetriesExhausted { last, .. } => Some(last),
            QueueError::Shutdown => None,
        }
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Upstream(e) => write!(f, "request failed: {}", e),
            QueueError::RetriesExhausted { attempts, last } => {
                write!(f, "request failed after {} attempts: {}", attempts, last)
            }
            QueueError::Shutdown => write!(f, "request queue shut down"),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.upstream()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Error returned when stopping the queue worker fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// The worker task panicked or was cancelled
    WorkerFailed(String),
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::WorkerFailed(reason) => {
                write!(f, "queue worker did not stop cleanly: {}", reason)
            }
        }
    }
}

impl std::error::Error for ShutdownError {}

/// Outcome of an enqueued request, resolved exactly once.
///
/// Every caller that enqueued the same key receives the same outcome.
#[must_use = "a Completion does nothing unless awaited"]
#[derive(Debug)]
pub struct Completion<T> {
    receiver: oneshot::Receiver<Result<T, QueueError>>,
}

impl<T> Future for Completion<T> {
    type Output = Result<T, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(QueueError::Shutdown)))
    }
}

/// Rate-limited, deduplicating, retrying request queue.
///
/// # Example
/// ```
/// use fetch_throttle::{RequestQueue, UpstreamError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let queue: RequestQueue<u32> = RequestQueue::<u32>::builder()
///     .with_per_second(3)
///     .with_per_minute(60)
///     .build()?;
///
/// let first = queue.enqueue("anime/1", || async { Ok::<_, UpstreamError>(1) });
/// // Same key: attached to the first request, the work runs once.
/// let second = queue.enqueue("anime/1", || async { Ok::<_, UpstreamError>(2) });
///
/// assert_eq!(first.await?, 1);
/// assert_eq!(second.await?, 1);
///
/// queue.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct RequestQueue<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    status: StatusBroadcaster,
    metrics: Metrics,
    clock: Arc<dyn Clock>,
    config: Arc<QueueConfig>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<T> RequestQueue<T>
where
    T: Clone + Send + 'static,
{
    /// Create a queue with default limits.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn new() -> Self {
        Self::spawn(QueueConfig::default(), Arc::new(TokioClock::new()))
    }

    /// Create a builder for configuring the queue.
    ///
    /// Defaults:
    /// - 3 requests per second, 60 per minute
    /// - 10 second pause when the per-minute ceiling is hit
    /// - 5 second rate-limit penalty, doubling per repeat, capped at 60 seconds
    /// - 5 retries with 2 second exponential backoff and 0.8-1.2 jitter
    /// - 350 ms between attempts
    pub fn builder() -> QueueBuilder {
        QueueBuilder::new()
    }

    fn spawn(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (publisher, status) = status::channel();
        let metrics = Metrics::new();
        let config = Arc::new(config);

        let worker = Worker::new(
            QueueConfig::clone(&config),
            Arc::clone(&clock),
            publisher,
            metrics.clone(),
        );
        let handle = tokio::spawn(worker.run(receiver));

        Self {
            commands,
            status,
            metrics,
            clock,
            config,
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Submit `work` under `key` and return a handle to its outcome.
    ///
    /// If a request with the same key is already queued or in flight, no
    /// new entry is created and the returned handle resolves with that
    /// request's outcome. `work` may be called several times, once per
    /// attempt.
    pub fn enqueue<F, Fut>(&self, key: impl Into<RequestKey>, work: F) -> Completion<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        self.enqueue_work(key.into(), into_work(work))
    }

    pub(crate) fn enqueue_work(&self, key: RequestKey, work: Work<T>) -> Completion<T> {
        let (reply, receiver) = oneshot::channel();
        if self
            .commands
            .send(Command::Enqueue { key, work, reply })
            .is_err()
        {
            tracing::debug!("request queue is shut down, rejecting request");
        }
        Completion { receiver }
    }
}

impl<T> RequestQueue<T> {
    /// Latest status snapshot.
    pub fn status(&self) -> QueueStatus {
        self.status.current()
    }

    /// Status channel for observers.
    pub fn broadcaster(&self) -> &StatusBroadcaster {
        &self.status
    }

    /// Call `listener` with the current status and every change.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(QueueStatus) + Send + 'static,
    {
        self.status.subscribe(listener)
    }

    /// Counters of queue and cache activity.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Clock used for timestamps.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Active configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Whether the worker is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Requests still queued or in flight are rejected with
    /// [`QueueError::Shutdown`]; later enqueues are rejected the same way.
    /// Calling it again, or from a clone, is a no-op.
    ///
    /// # Errors
    /// Returns `ShutdownError::WorkerFailed` if the worker task panicked.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        let _ = self.commands.send(Command::Shutdown);

        // Take the handle while holding the lock, then release the lock before awaiting
        let handle = {
            let mut guard = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            guard.take()
        };

        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| ShutdownError::WorkerFailed(e.to_string()))?;
        }
        Ok(())
    }
}

impl<T> Clone for RequestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            status: self.status.clone(),
            metrics: self.metrics.clone(),
            clock: Arc::clone(&self.clock),
            config: Arc::clone(&self.config),
            worker: Arc::clone(&self.worker),
        }
    }
}

impl<T> std::fmt::Debug for RequestQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("status", &self.status())
            .field("running", &self.is_running())
            .finish()
    }
}

impl QueueBuilder {
    /// Validate the configuration and start the queue worker.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn build<T>(self) -> Result<RequestQueue<T>, ConfigError>
    where
        T: Clone + Send + 'static,
    {
        let (config, clock) = self.finish()?;
        let clock = clock.unwrap_or_else(|| Arc::new(TokioClock::new()));
        Ok(RequestQueue::spawn(config, clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_resolves() {
        let queue: RequestQueue<&'static str> = RequestQueue::new();
        let result = queue.enqueue("genres", || async { Ok("action") }).await;

        assert_eq!(result, Ok("action"));
        assert_eq!(queue.metrics().dispatched(), 1);
        assert_eq!(queue.metrics().succeeded(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let queue: RequestQueue<u32> = RequestQueue::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result = queue
            .enqueue("anime/0", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(UpstreamError::from_status(404, "Not Found")) }
            })
            .await;

        assert_eq!(
            result,
            Err(QueueError::Upstream(UpstreamError::from_status(404, "Not Found")))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.metrics().failed(), 1);
        assert_eq!(queue.metrics().retried(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried() {
        let queue: RequestQueue<u32> = RequestQueue::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result = queue
            .enqueue("top/anime", move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(UpstreamError::from_status(503, "Service Unavailable"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.metrics().retried(), 2);
    }

    fn explode() -> Result<u32, UpstreamError> {
        panic!("work exploded")
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_work_is_rejected() {
        let queue: RequestQueue<u32> = RequestQueue::new();
        let result = queue.enqueue("boom", || async { explode() }).await;

        assert!(matches!(result, Err(QueueError::Upstream(UpstreamError::Other(_)))));

        // The worker survives and keeps serving.
        let result = queue.enqueue("ok", || async { Ok(1) }).await;
        assert_eq!(result, Ok(1));
    }

    fn explode_before_start() -> std::future::Ready<Result<u32, UpstreamError>> {
        panic!("work exploded before returning a future")
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_closure_is_rejected() {
        let queue: RequestQueue<u32> = RequestQueue::new();
        let result = queue.enqueue("boom", explode_before_start).await;

        assert_eq!(
            result,
            Err(QueueError::Upstream(UpstreamError::other("work panicked")))
        );
        assert_eq!(queue.metrics().retried(), 0);
        assert!(queue.is_running());

        let result = queue.enqueue("ok", || async { Ok(1) }).await;
        assert_eq!(result, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_attempts() {
        let queue: RequestQueue<tokio::time::Instant> = RequestQueue::<tokio::time::Instant>::builder()
            .with_dispatch_spacing(Duration::from_millis(500))
            .build()
            .unwrap();

        let first = queue.enqueue("a", || async { Ok(tokio::time::Instant::now()) });
        let second = queue.enqueue("b", || async { Ok(tokio::time::Instant::now()) });
        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert!(second.duration_since(first) >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_shutdown_is_rejected() {
        let queue: RequestQueue<u32> = RequestQueue::new();
        queue.shutdown().await.unwrap();

        assert!(!queue.is_running());
        let result = queue.enqueue("late", || async { Ok(1) }).await;
        assert_eq!(result, Err(QueueError::Shutdown));

        // Second shutdown is a no-op.
        queue.shutdown().await.unwrap();
    }

    #[test]
    fn test_error_display_and_source() {
        use std::error::Error;

        let err = QueueError::RetriesExhausted {
            attempts: 6,
            last: UpstreamError::network("connection reset"),
        };
        assert_eq!(
            err.to_string(),
            "request failed after 6 attempts: network error: connection reset"
        );
        assert!(err.source().is_some());
        assert!(QueueError::Shutdown.source().is_none());
    }
}
