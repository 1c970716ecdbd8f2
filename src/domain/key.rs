//! Request identity.
//!
//! A request key names one upstream read: the endpoint plus its parameters.
//! Two calls with the same key are the same request, so the queue runs the
//! work once and the cache stores one entry for both.

use ahash::AHasher;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use url::form_urlencoded;

/// Deduplication and cache key for an upstream request.
///
/// Keys are plain strings. [`RequestKey::new`] builds them from an endpoint
/// and parameters in a canonical order; any string converts directly.
///
/// # Example
/// ```
/// use fetch_throttle::RequestKey;
///
/// let a = RequestKey::new("anime").param("page", 2).param("q", "naruto").build();
/// let b = RequestKey::new("anime").param("q", "naruto").param("page", 2).build();
///
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "anime?page=2&q=naruto");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    /// Start building a key for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> KeyBuilder {
        KeyBuilder {
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
        }
    }

    /// Key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 64-bit hash of the key, handy for compact log fields. Stable within one process.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = AHasher::default();
        self.0.hash(&mut hasher);
        hasher.finish()
    }

    /// Consume the key and return its text.
    pub fn into_string(self) -> String {
        self.0
    }
}

/// Builder returned by [`RequestKey::new`].
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    endpoint: String,
    params: BTreeMap<String, String>,
}

impl KeyBuilder {
    /// Add a parameter. A repeated name replaces the earlier value.
    pub fn param(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    /// Finish the key.
    ///
    /// Names and values are form-encoded, so the key is also a valid
    /// query string and distinct parameter sets never collide.
    pub fn build(self) -> RequestKey {
        if self.params.is_empty() {
            return RequestKey(self.endpoint);
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.params)
            .finish();
        RequestKey(format!("{}?{}", self.endpoint, query))
    }
}

impl From<KeyBuilder> for RequestKey {
    fn from(builder: KeyBuilder) -> Self {
        builder.build()
    }
}

impl From<&str> for RequestKey {
    fn from(key: &str) -> Self {
        RequestKey(key.to_string())
    }
}

impl From<String> for RequestKey {
    fn from(key: String) -> Self {
        RequestKey(key)
    }
}

impl From<&RequestKey> for RequestKey {
    fn from(key: &RequestKey) -> Self {
        key.clone()
    }
}

impl Borrow<str> for RequestKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RequestKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
