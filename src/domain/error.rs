//! Upstream failure taxonomy.
//!
//! Work closures report failures as [`UpstreamError`]. The queue only cares
//! about the [`ErrorClass`] of a failure: rate-limit signals and transient
//! faults are retried, everything else is surfaced immediately.

use std::fmt;

/// HTTP status the upstream uses to signal a rate-limit breach.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// How the retry policy treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Upstream rate-limit signal: retried, and pauses the whole queue
    RateLimit,
    /// Network or server fault: retried
    Transient,
    /// Client error or malformed input: never retried
    Permanent,
}

impl ErrorClass {
    /// Whether failures of this class are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

/// Failure reported by a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// The upstream answered with an HTTP status
    Status {
        /// Response status code
        code: u16,
        /// Status text or response body excerpt
        message: String,
    },
    /// The request never produced a response (connect, timeout, reset)
    Network(String),
    /// The response could not be decoded
    Decode(String),
    /// Anything else; classified by message content
    Other(String),
}

impl UpstreamError {
    /// Failure carrying an HTTP status.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        UpstreamError::Status {
            code,
            message: message.into(),
        }
    }

    /// Upstream rate-limit signal.
    pub fn rate_limited() -> Self {
        Self::from_status(TOO_MANY_REQUESTS, "Too Many Requests")
    }

    /// Transport-level failure.
    pub fn network(message: impl Into<String>) -> Self {
        UpstreamError::Network(message.into())
    }

    /// Failure known only by its message.
    pub fn other(message: impl Into<String>) -> Self {
        UpstreamError::Other(message.into())
    }

    /// HTTP status, if the upstream answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Decide how the retry policy treats this failure.
    pub fn classify(&self) -> ErrorClass {
        match self {
            UpstreamError::Status { code, .. } => classify_status(*code),
            UpstreamError::Network(_) => ErrorClass::Transient,
            UpstreamError::Decode(_) => ErrorClass::Permanent,
            UpstreamError::Other(message) => classify_message(message),
        }
    }

    /// Shorthand for `classify() == ErrorClass::RateLimit`.
    pub fn is_rate_limit(&self) -> bool {
        self.classify() == ErrorClass::RateLimit
    }
}

fn classify_status(code: u16) -> ErrorClass {
    match code {
        TOO_MANY_REQUESTS => ErrorClass::RateLimit,
        500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();
    if lower.contains("429") || lower.contains("too many requests") {
        return ErrorClass::RateLimit;
    }

    const TRANSIENT_MARKERS: [&str; 7] = [
        "network",
        "failed to fetch",
        "timed out",
        "connection",
        "500",
        "502",
        "503",
    ];
    if TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Status { code, message } => {
                write!(f, "upstream returned {}: {}", code, message)
            }
            UpstreamError::Network(message) => write!(f, "network error: {}", message),
            UpstreamError::Decode(message) => write!(f, "malformed response: {}", message),
            UpstreamError::Other(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for UpstreamError {}
