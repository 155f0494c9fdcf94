//! Resilience primitives for talking to unreliable stores
//!
//! - **Circuit Breaker**: isolates a failing target and probes it back to
//!   health
//! - **Backoff**: exponential delays with full jitter
//! - **Bulkhead**: bounded concurrency per target
//! - **Tracing**: shared structured log events for retry loops
//!
//! These pieces are generic. The sync core composes them per target.

pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod tracing;

pub use backoff::{ExponentialBackoff, Jitter, MAX_BACKOFF_EXPONENT};
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadMetrics, BulkheadPermit};
pub use circuit_breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerMetrics, CircuitOpen, CircuitState, TransitionListener,
};
pub use self::tracing::RetrySpan;
