//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - TTL cache (lazy expiry over a storage port)
//! - Request queue (worker task, handle, completions)
//! - Status broadcaster (watch channel and subscriptions)
//! - Cached dispatcher (cache-first entry point)
//! - Metrics
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod metrics;
pub mod ports;
pub mod queue;
pub mod request;
pub mod status;
pub(crate) mod worker;
