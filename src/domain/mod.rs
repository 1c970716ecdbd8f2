//! Domain layer - pure logic with no runtime dependencies.
//!
//! This layer holds the rules of the admission engine:
//! - Retry backoff with jitter
//! - Rate window counters and the pause state machine
//! - Upstream error taxonomy
//! - Request identity
//! - Status snapshots
//!
//! Everything here takes time as an argument, so it is testable without a runtime.

pub mod backoff;
pub mod error;
pub mod key;
pub mod status;
pub mod window;
