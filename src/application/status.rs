//! Status broadcasting.
//!
//! The queue publishes a [`QueueStatus`] every time its length, busy flag,
//! counters or pause state change. Observers read the latest snapshot or
//! register a listener. Publishing never waits for observers; a slow
//! listener sees the most recent snapshot and skips intermediate ones.

use crate::domain::status::QueueStatus;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Write side of the status channel, owned by the queue worker.
#[derive(Debug)]
pub(crate) struct StatusPublisher {
    sender: watch::Sender<QueueStatus>,
}

impl StatusPublisher {
    /// Publish `status` if it differs from the last published snapshot.
    ///
    /// Returns `true` if observers were notified.
    pub(crate) fn publish(&self, status: QueueStatus) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        })
    }
}

/// Create a connected publisher and broadcaster pair.
pub(crate) fn channel() -> (StatusPublisher, StatusBroadcaster) {
    let (sender, receiver) = watch::channel(QueueStatus::default());
    (StatusPublisher { sender }, StatusBroadcaster { receiver })
}

/// Read side of the status channel.
///
/// Cheap to clone. Every clone observes the same snapshots.
#[derive(Debug, Clone)]
pub struct StatusBroadcaster {
    receiver: watch::Receiver<QueueStatus>,
}

impl StatusBroadcaster {
    /// Latest published snapshot.
    pub fn current(&self) -> QueueStatus {
        *self.receiver.borrow()
    }

    /// A raw receiver for callers that want to drive the channel themselves,
    /// e.g. with `wait_for`.
    pub fn receiver(&self) -> watch::Receiver<QueueStatus> {
        self.receiver.clone()
    }

    /// Call `listener` with the current snapshot and then with every change.
    ///
    /// The listener runs on its own task, so it never delays dispatch.
    /// Listening stops when the returned [`Subscription`] is dropped or
    /// unsubscribed, or when the queue shuts down.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn subscribe<F>(&self, mut listener: F) -> Subscription
    where
        F: FnMut(QueueStatus) + Send + 'static,
    {
        let mut receiver = self.receiver.clone();
        let task = tokio::spawn(async move {
            loop {
                let status = *receiver.borrow_and_update();
                listener(status);
                if receiver.changed().await.is_err() {
                    break;
                }
            }
        });

        Subscription { task: Some(task) }
    }
}

/// Handle of a registered status listener.
///
/// Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stop calling the listener.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    /// Whether the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
