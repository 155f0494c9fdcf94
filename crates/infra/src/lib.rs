//! # StrataSync Infrastructure
//!
//! Infrastructure implementations of core ports and process-level wiring.
//!
//! This crate contains:
//! - Configuration loading from files and `STRATASYNC_*` environment variables
//! - Tracing subscriber initialisation
//! - A Prometheus implementation of the metrics sink
//! - A file-backed payload store and recovery journal
//! - The background recovery scheduler
//!
//! ## Architecture
//! - Implements traits defined in `stratasync-core`
//! - Contains all "impure" code (filesystem, exporters, background tasks)

pub mod config;
pub mod errors;
mod fs;
pub mod observability;
pub mod payload;
pub mod recovery;

pub use errors::{InfraError, InfraResult};
pub use observability::{init_logging, PrometheusMetricsSink};
pub use payload::FilePayloadStore;
pub use recovery::{RecoveryJournal, RecoveryScheduler, SchedulerConfig};
