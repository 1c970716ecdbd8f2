//! Mock implementations for testing.
//!
//! Test doubles for infrastructure adapters, so expiry and admission logic
//! can be driven without waiting on real time.

pub mod clock;

pub use clock::MockClock;
