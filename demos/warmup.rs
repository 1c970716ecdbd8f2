//! Warm a cache through the rate-limited queue and watch the queue work.
//!
//! Run with:
//! ```sh
//! RUST_LOG=fetch_throttle=debug cargo run --example warmup
//! ```

use fetch_throttle::{
    CacheCategory, CachedDispatcher, PrefetchJob, RequestKey, RequestQueue, UpstreamError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Stand-in for an HTTP call: slow, and rate-limited on every fifth call.
async fn upstream(calls: Arc<AtomicU32>, key: RequestKey) -> Result<String, UpstreamError> {
    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(Duration::from_millis(120)).await;
    if n % 5 == 0 {
        return Err(UpstreamError::rate_limited());
    }
    Ok(format!("payload for {}", key))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let queue = RequestQueue::<String>::builder()
        .with_per_second(3)
        .with_per_minute(60)
        .build()?;
    let dispatcher = CachedDispatcher::new(queue.clone());

    let subscription = queue.subscribe(|status| {
        tracing::info!(%status, "queue status");
    });

    let calls = Arc::new(AtomicU32::new(0));
    let jobs = ["top/anime", "seasons/now", "genres/anime", "top/manga", "schedules"]
        .into_iter()
        .map(|endpoint| {
            let key = RequestKey::new(endpoint).param("page", 1).build();
            let producer_key = key.clone();
            let calls = Arc::clone(&calls);
            PrefetchJob::new(key, dispatcher.ttl(CacheCategory::Top), move || {
                upstream(Arc::clone(&calls), producer_key.clone())
            })
        })
        .collect();

    let report = dispatcher
        .prefetch(jobs, Duration::from_millis(500)..Duration::from_millis(1000))
        .await;
    tracing::info!(
        loaded = report.loaded.len(),
        cached = report.cached.len(),
        failed = report.failed.len(),
        "warm-up finished"
    );

    // A burst of reads, half of them already cached.
    let mut reads = Vec::new();
    for id in 1..=6 {
        let dispatcher = dispatcher.clone();
        let calls = Arc::clone(&calls);
        reads.push(tokio::spawn(async move {
            let key = RequestKey::new("anime").param("id", id % 3).build();
            let producer_key = key.clone();
            dispatcher
                .fetch(CacheCategory::Details, key, move || {
                    upstream(Arc::clone(&calls), producer_key.clone())
                })
                .await
        }));
    }
    for read in reads {
        if let Err(e) = read.await? {
            tracing::warn!(error = %e, "read failed");
        }
    }

    let metrics = queue.metrics().snapshot();
    tracing::info!(
        upstream_calls = calls.load(Ordering::SeqCst),
        dispatched = metrics.dispatched,
        calls_saved = metrics.calls_saved(),
        hit_rate = metrics.cache_hit_rate(),
        "done"
    );

    subscription.unsubscribe();
    queue.shutdown().await?;
    Ok(())
}
