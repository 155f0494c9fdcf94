//! # StrataSync Domain
//!
//! Data model for the synchronization core.
//!
//! This crate contains:
//! - Targets, batches and per-target sync operations
//! - Status and error taxonomies shared by metrics and logs
//! - Recovery jobs, audit records and snapshots
//! - Configuration structures and validation
//!
//! ## Architecture
//! - No dependencies on other StrataSync crates
//! - Only external dependencies allowed
//! - Pure data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

pub use config::*;
pub use errors::*;
pub use types::*;
