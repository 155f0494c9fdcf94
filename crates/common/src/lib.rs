//! Modular common utilities shared across StrataSync crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: errors and error classification
//! - `runtime`: clocks and resilience primitives (breaker, backoff, bulkhead)
//! - `observability`: tracing support (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;
#[cfg(feature = "runtime")]
pub mod time;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    BreakerPermit, Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, CircuitOpen,
    CircuitState, ExponentialBackoff, Jitter, RetrySpan,
};
#[cfg(feature = "runtime")]
pub use time::{Clock, MockClock, SharedClock, SystemClock};
