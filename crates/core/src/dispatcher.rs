//! Fan-out of one ingestion batch to its targets

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use stratasync_common::SharedClock;
use stratasync_domain::{Batch, BatchId, SyncOperation, SyncStatus, TargetId};
use tracing::{info, instrument, warn};

use crate::clock::utc_now;
use crate::errors::SyncResult;
use crate::executor::{SyncOperationExecutor, SyncReport};

/// Per-target results for one batch
#[derive(Debug)]
pub struct DispatchReport {
    /// Batch that was dispatched
    pub batch_id: BatchId,
    /// One result per requested target, in request order
    pub results: Vec<(TargetId, SyncResult<SyncReport>)>,
}

/// Status counts across a dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Operations that reached every record
    pub succeeded: usize,
    /// Operations handed to recovery
    pub failed_retryable: usize,
    /// Operations that failed permanently
    pub failed_terminal: usize,
    /// Operations withdrawn before completion
    pub cancelled: usize,
    /// Targets that could not be executed at all
    pub errors: usize,
}

impl DispatchReport {
    /// Result for one target
    pub fn report(&self, target_id: &TargetId) -> Option<&SyncResult<SyncReport>> {
        self.results.iter().find(|(id, _)| id == target_id).map(|(_, result)| result)
    }

    /// Whether every target succeeded
    pub fn all_succeeded(&self) -> bool {
        self.results
            .iter()
            .all(|(_, result)| matches!(result, Ok(report) if report.succeeded()))
    }

    /// Count results by status
    pub fn summary(&self) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        for (_, result) in &self.results {
            match result {
                Ok(report) => match report.status {
                    SyncStatus::Succeeded => summary.succeeded += 1,
                    SyncStatus::FailedTerminal => summary.failed_terminal += 1,
                    SyncStatus::Cancelled => summary.cancelled += 1,
                    SyncStatus::Pending | SyncStatus::InProgress | SyncStatus::FailedRetryable => {
                        summary.failed_retryable += 1;
                    }
                },
                Err(_) => summary.errors += 1,
            }
        }
        summary
    }
}

/// Routes batches to targets through the executor
#[derive(Clone)]
pub struct SyncDispatcher {
    executor: Arc<SyncOperationExecutor>,
    clock: SharedClock,
}

impl std::fmt::Debug for SyncDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncDispatcher").field("executor", &self.executor).finish_non_exhaustive()
    }
}

impl SyncDispatcher {
    /// Create a dispatcher over `executor`
    pub fn new(executor: Arc<SyncOperationExecutor>, clock: SharedClock) -> Self {
        Self { executor, clock }
    }

    /// Run one operation per target concurrently
    ///
    /// A failure on one target never blocks or fails its siblings. Duplicate
    /// target ids are dispatched once.
    #[instrument(skip(self, batch, targets), fields(batch_id = %batch.batch_id, records = batch.len()))]
    pub async fn dispatch(&self, batch: Batch, targets: &[TargetId]) -> DispatchReport {
        let batch_id = batch.batch_id;
        let batch = Arc::new(batch);

        let mut seen = HashSet::new();
        let targets: Vec<TargetId> =
            targets.iter().filter(|id| seen.insert((*id).clone())).cloned().collect();
        if targets.is_empty() {
            warn!("Batch dispatched with no targets");
            return DispatchReport { batch_id, results: Vec::new() };
        }

        let now = utc_now(self.clock.as_ref());
        let runs = targets.iter().map(|target| {
            let operation = SyncOperation::new(Arc::clone(&batch), target.clone(), now);
            self.executor.execute(operation)
        });
        let results: Vec<(TargetId, SyncResult<SyncReport>)> =
            targets.iter().cloned().zip(join_all(runs).await).collect();
        drop(batch);

        let report = DispatchReport { batch_id, results };
        let summary = report.summary();
        info!(
            succeeded = summary.succeeded,
            failed_retryable = summary.failed_retryable,
            failed_terminal = summary.failed_terminal,
            errors = summary.errors,
            "Batch dispatched"
        );
        report
    }

    /// Dispatch to every registered target
    pub async fn dispatch_all(&self, batch: Batch) -> DispatchReport {
        let targets = self.executor.registry().target_ids();
        self.dispatch(batch, &targets).await
    }
}
