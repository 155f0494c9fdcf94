//! # StrataSync Core
//!
//! Resilient delivery of ingestion batches to independent downstream stores.
//!
//! This crate contains:
//! - Port interfaces for store clients, metrics and payload storage
//! - The per-target registry (breaker, worker pool, retry policy, client)
//! - The operation executor with its bounded local retry loop
//! - The recovery manager for longer-horizon retries and escalation
//! - The batch dispatcher and the engine builder that wires them together
//!
//! ## Architecture Principles
//! - Depends only on `stratasync-common` and `stratasync-domain`
//! - No filesystem, network or exporter code
//! - All external dependencies via traits
//! - One breaker per target, owned by the registry; no global state

mod clock;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod metrics;
pub mod payload;
pub mod ports;
pub mod recovery;
pub mod registry;
pub mod retry;

pub use dispatcher::{DispatchReport, DispatchSummary, SyncDispatcher};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use errors::{StoreError, SyncError, SyncResult};
pub use executor::{SyncOperationExecutor, SyncReport};
pub use metrics::{InMemoryMetricsSink, NoopMetricsSink, SyncMetrics};
pub use payload::InMemoryPayloadStore;
pub use ports::{MetricsSink, PayloadStore, RecoveryHook, StoreClient, WriteAck};
pub use recovery::{RecoveryManager, SubmitOutcome, TickSummary};
pub use registry::{TargetEntry, TargetRegistry};
pub use retry::RetryPolicy;
