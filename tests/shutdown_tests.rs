//! Integration tests for stopping the request queue.

use fetch_throttle::{QueueError, RequestQueue, UpstreamError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn slow(value: u32) -> Result<u32, UpstreamError> {
    tokio::time::sleep(Duration::from_secs(10)).await;
    Ok(value)
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_in_flight_and_queued() {
    let queue: RequestQueue<u32> = RequestQueue::new();

    let in_flight = queue.enqueue("slow", || slow(1));
    let queued = queue.enqueue("waiting", || slow(2));

    // Let the first attempt start; the second waits behind it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = queue.status();
    assert!(status.is_dispatching);
    assert_eq!(status.queue_length, 1);

    queue.shutdown().await.unwrap();

    assert_eq!(in_flight.await, Err(QueueError::Shutdown));
    assert_eq!(queued.await, Err(QueueError::Shutdown));
    assert!(!queue.is_running());

    let status = queue.status();
    assert_eq!(status.queue_length, 0);
    assert!(!status.is_dispatching);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_attempt_does_not_finish() {
    let queue: RequestQueue<u32> = RequestQueue::new();
    let finished = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&finished);
    let completion = queue.enqueue("slow", move || {
        let flag = Arc::clone(&flag);
        async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(1)
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.shutdown().await.unwrap();
    assert_eq!(completion.await, Err(QueueError::Shutdown));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!finished.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_every_handle_stops_worker() {
    let queue: RequestQueue<u32> = RequestQueue::new();
    let completion = queue.enqueue("slow", || slow(1));
    let broadcaster = queue.broadcaster().clone();

    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(queue);

    assert_eq!(completion.await, Err(QueueError::Shutdown));
    assert!(!broadcaster.current().is_dispatching);
}

#[tokio::test(start_paused = true)]
async fn test_clone_keeps_worker_alive() {
    let queue: RequestQueue<u32> = RequestQueue::new();
    let clone = queue.clone();
    drop(queue);

    let result = clone.enqueue("anime/1", || async { Ok(1) }).await;
    assert_eq!(result, Ok(1));
    assert!(clone.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_from_any_clone_is_idempotent() {
    let queue: RequestQueue<u32> = RequestQueue::new();
    let clone = queue.clone();

    clone.shutdown().await.unwrap();
    queue.shutdown().await.unwrap();
    clone.shutdown().await.unwrap();

    assert!(!queue.is_running());
    let late = queue.enqueue("late", || async { Ok(1) }).await;
    assert_eq!(late, Err(QueueError::Shutdown));
}

#[tokio::test(start_paused = true)]
async fn test_subscription_ends_with_queue() {
    let queue: RequestQueue<u32> = RequestQueue::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let subscription = queue.subscribe(move |status| {
        sink.lock().unwrap().push(status.queue_length);
    });

    queue.enqueue("a", || async { Ok(1) }).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(subscription.is_active());

    queue.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!subscription.is_active());
    assert!(!seen.lock().unwrap().is_empty());
}
