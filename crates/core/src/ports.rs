//! Port interfaces implemented outside the core

use std::sync::Arc;

use async_trait::async_trait;
use stratasync_domain::{Batch, OperationId, PayloadHandle, Target};

use crate::errors::{StoreError, SyncResult};

/// Acknowledgement returned by a successful store write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteAck {
    /// Records the store accepted
    pub records_written: usize,
}

impl WriteAck {
    /// Acknowledge `records_written` records
    pub fn new(records_written: usize) -> Self {
        Self { records_written }
    }
}

/// Client for one downstream store
///
/// Writes are assumed to be idempotent upserts; the core delivers at least
/// once and may repeat a batch after a timeout.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Write a whole batch
    async fn write(&self, batch: &Batch) -> Result<WriteAck, StoreError>;
}

/// Receiver for counters, histograms and gauges
///
/// Implementations must be cheap and non-blocking; they are called on the
/// hot path of every attempt.
pub trait MetricsSink: Send + Sync {
    /// Add `value` to a counter series
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)], value: u64);

    /// Record one histogram sample
    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64);

    /// Overwrite a gauge series
    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Durable storage for payloads awaiting recovery
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Store the batch for `operation_id` and return its handle
    ///
    /// Storing the same operation twice returns the same handle.
    async fn put(&self, operation_id: OperationId, batch: Arc<Batch>) -> SyncResult<PayloadHandle>;

    /// Load a stored batch; `None` when the handle is unknown
    async fn get(&self, handle: &PayloadHandle) -> SyncResult<Option<Arc<Batch>>>;

    /// Drop a stored batch (no-op for unknown handles)
    async fn release(&self, handle: &PayloadHandle) -> SyncResult<()>;
}

/// Procedure run before each recovery attempt against a target kind
///
/// Used to rebuild connection pools or drop stale sessions before the store
/// is tried again.
#[async_trait]
pub trait RecoveryHook: Send + Sync {
    /// Prepare `target` for a re-attempt
    ///
    /// An error skips the attempt; it still counts towards the recovery
    /// ceiling.
    async fn prepare(&self, target: &Target) -> Result<(), StoreError>;
}
