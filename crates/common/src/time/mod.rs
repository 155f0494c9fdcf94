//! Time abstractions
//!
//! - **[`clock`]**: real and mock clocks shared by the resilience primitives

pub mod clock;

pub use clock::{Clock, MockClock, SharedClock, SystemClock};
