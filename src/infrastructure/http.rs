//! JSON producer over HTTP.
//!
//! Maps reqwest failures onto [`UpstreamError`] so the queue classifies
//! them correctly: transport problems are transient, 429 is a rate-limit
//! signal, 5xx is transient, and everything else fails fast.

use crate::application::request::WorkFuture;
use crate::domain::error::UpstreamError;
use crate::domain::key::RequestKey;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Fetches JSON documents from one upstream base URL.
///
/// Cheap to clone; clones share the connection pool.
///
/// # Example
/// ```no_run
/// use fetch_throttle::{CachedDispatcher, JsonFetcher, RequestKey, RequestQueue};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = JsonFetcher::new("https://api.jikan.moe/v4");
/// let dispatcher = CachedDispatcher::new(RequestQueue::<serde_json::Value>::new());
///
/// let key = RequestKey::new("top/anime").param("page", 1).build();
/// let top = dispatcher
///     .fetch_cached(key.clone(), Duration::from_secs(6 * 60 * 60), fetcher.producer(&key))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct JsonFetcher {
    client: reqwest::Client,
    base_url: Arc<str>,
}

impl JsonFetcher {
    /// Default per-request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

    /// Create a fetcher for `base_url` with a default client.
    ///
    /// If the client cannot be built with [`DEFAULT_TIMEOUT`], a warning is
    /// logged and a client without a timeout is used. Call [`try_new`] to
    /// get the build error instead.
    ///
    /// [`DEFAULT_TIMEOUT`]: JsonFetcher::DEFAULT_TIMEOUT
    /// [`try_new`]: JsonFetcher::try_new
    pub fn new(base_url: impl AsRef<str>) -> Self {
        let client = Self::default_client().unwrap_or_else(|e| {
            tracing::warn!(
                error = %e,
                timeout = ?Self::DEFAULT_TIMEOUT,
                "failed to build HTTP client with timeout, using defaults"
            );
            reqwest::Client::default()
        });
        Self::with_client(client, base_url)
    }

    /// Create a fetcher for `base_url` with a client using [`DEFAULT_TIMEOUT`].
    ///
    /// # Errors
    /// Returns the reqwest error if the client cannot be built.
    ///
    /// [`DEFAULT_TIMEOUT`]: JsonFetcher::DEFAULT_TIMEOUT
    pub fn try_new(base_url: impl AsRef<str>) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(Self::default_client()?, base_url))
    }

    /// Create a fetcher for `base_url` that uses `client`.
    pub fn with_client(client: reqwest::Client, base_url: impl AsRef<str>) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.as_ref().trim_end_matches('/')),
        }
    }

    fn default_client() -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()
    }

    /// Full URL for a request key.
    pub fn url(&self, key: &RequestKey) -> String {
        format!("{}/{}", self.base_url, key.as_str().trim_start_matches('/'))
    }

    /// GET the document for `key` and decode it.
    ///
    /// # Errors
    /// - `UpstreamError::Network` if no response arrived
    /// - `UpstreamError::Status` for a non-success status
    /// - `UpstreamError::Decode` if the body is not the expected JSON
    pub async fn get<T: DeserializeOwned>(&self, key: &RequestKey) -> Result<T, UpstreamError> {
        let url = self.url(key);
        tracing::trace!(url = %url, "GET");

        let response = self.client.get(&url).send().await.map_err(map_error)?;
        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("unknown status");
            return Err(UpstreamError::from_status(status.as_u16(), reason));
        }

        response.json::<T>().await.map_err(map_error)
    }

    /// A repeatable producer for `key`, ready to hand to the queue.
    pub fn producer<T>(&self, key: &RequestKey) -> impl Fn() -> WorkFuture<T> + Send + Sync + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        let fetcher = self.clone();
        let key = key.clone();
        move || -> WorkFuture<T> {
            let fetcher = fetcher.clone();
            let key = key.clone();
            Box::pin(async move { fetcher.get(&key).await })
        }
    }
}

fn map_error(err: reqwest::Error) -> UpstreamError {
    if err.is_decode() {
        return UpstreamError::Decode(err.to_string());
    }
    if let Some(status) = err.status() {
        return UpstreamError::from_status(status.as_u16(), err.to_string());
    }
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        return UpstreamError::network(err.to_string());
    }
    UpstreamError::other(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_base_and_key() {
        let fetcher = JsonFetcher::new("https://api.example.com/v4/");
        let key = RequestKey::new("anime").param("page", 2).build();

        assert_eq!(fetcher.url(&key), "https://api.example.com/v4/anime?page=2");
        assert_eq!(
            fetcher.url(&RequestKey::from("/genres/anime")),
            "https://api.example.com/v4/genres/anime"
        );
    }

    #[test]
    fn test_try_new_builds_timed_client() {
        let fetcher = JsonFetcher::try_new("https://api.example.com/v4").unwrap();
        let key = RequestKey::from("top/anime");

        assert_eq!(fetcher.url(&key), JsonFetcher::new("https://api.example.com/v4").url(&key));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let fetcher = JsonFetcher::new("http://127.0.0.1:9");
        let result: Result<serde_json::Value, _> = fetcher.get(&RequestKey::from("x")).await;

        let err = result.unwrap_err();
        assert!(err.classify().is_retryable(), "unexpected error: {:?}", err);
    }
}
