//! Background driver for recovery ticks
//!
//! Runs [`RecoveryManager::tick`] on a fixed cadence with explicit lifecycle
//! management: the join handle is tracked, cancellation is explicit, and
//! `stop` waits for the task with a timeout. When a journal is attached the
//! recovery state is saved after every tick and once more on stop.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use stratasync_core::SyncEngine;
//! use stratasync_infra::recovery::{RecoveryJournal, RecoveryScheduler, SchedulerConfig};
//!
//! # async fn example(engine: Arc<SyncEngine>) -> stratasync_infra::InfraResult<()> {
//! let mut scheduler = RecoveryScheduler::from_engine(&engine, SchedulerConfig::default())
//!     .with_journal(RecoveryJournal::new("/var/lib/stratasync/recovery.json"));
//! scheduler.restore().await?;
//! scheduler.start()?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use stratasync_core::{RecoveryManager, SyncEngine, SyncOperationExecutor, TickSummary};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::journal::RecoveryJournal;
use crate::errors::{InfraError, InfraResult};

/// Cadence and shutdown settings for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between ticks
    pub tick_interval: Duration,
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(10), join_timeout: Duration::from_secs(30) }
    }
}

impl SchedulerConfig {
    /// Use the engine's configured tick interval
    pub fn from_engine(engine: &SyncEngine) -> Self {
        Self { tick_interval: engine.config().recovery.tick_interval(), ..Self::default() }
    }
}

/// Recovery scheduler with explicit lifecycle management
pub struct RecoveryScheduler {
    recovery: Arc<RecoveryManager>,
    executor: Arc<SyncOperationExecutor>,
    journal: Option<RecoveryJournal>,
    config: SchedulerConfig,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RecoveryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryScheduler")
            .field("config", &self.config)
            .field("journal", &self.journal)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl RecoveryScheduler {
    /// Scheduler over an explicit manager and executor
    pub fn new(
        recovery: Arc<RecoveryManager>,
        executor: Arc<SyncOperationExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            recovery,
            executor,
            journal: None,
            config,
            cancellation: CancellationToken::new(),
            task_handle: None,
        }
    }

    /// Scheduler over the engine's manager and executor
    pub fn from_engine(engine: &SyncEngine, config: SchedulerConfig) -> Self {
        Self::new(Arc::clone(engine.recovery()), Arc::clone(engine.executor()), config)
    }

    /// Persist recovery state through `journal`
    #[must_use]
    pub fn with_journal(mut self, journal: RecoveryJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Load the journal, if any, into the recovery manager
    ///
    /// Returns the number of jobs restored.
    pub async fn restore(&self) -> InfraResult<usize> {
        let Some(journal) = &self.journal else {
            return Ok(0);
        };
        match journal.load().await? {
            Some(snapshot) => Ok(self.recovery.restore(snapshot)),
            None => Ok(0),
        }
    }

    /// Spawn the background tick loop
    #[instrument(skip(self))]
    pub fn start(&mut self) -> InfraResult<()> {
        if self.is_running() {
            return Err(InfraError::Scheduler("Recovery scheduler already running".into()));
        }

        self.cancellation = CancellationToken::new();

        let recovery = Arc::clone(&self.recovery);
        let executor = Arc::clone(&self.executor);
        let journal = self.journal.clone();
        let tick_interval = self.config.tick_interval;
        let cancel = self.cancellation.clone();

        let handle = tokio::spawn(async move {
            Self::run_loop(recovery, executor, journal, tick_interval, cancel).await;
        });

        self.task_handle = Some(handle);
        info!(
            tick_interval_ms = u64::try_from(tick_interval.as_millis()).unwrap_or(u64::MAX),
            "Recovery scheduler started"
        );
        Ok(())
    }

    /// Stop the loop, wait for it, and save a final journal entry
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> InfraResult<()> {
        if !self.is_running() {
            return Err(InfraError::Scheduler("Recovery scheduler not running".into()));
        }

        self.cancellation.cancel();

        if let Some(mut handle) = self.task_handle.take() {
            match tokio::time::timeout(self.config.join_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "Recovery scheduler task panicked");
                    return Err(InfraError::Scheduler("Recovery scheduler task panicked".into()));
                }
                Err(_) => {
                    handle.abort();
                    warn!(
                        join_timeout_ms =
                            u64::try_from(self.config.join_timeout.as_millis()).unwrap_or(u64::MAX),
                        "Recovery scheduler did not stop within timeout, task aborted"
                    );
                    return Err(InfraError::Scheduler("Recovery scheduler stop timed out".into()));
                }
            }
        }

        if let Some(journal) = &self.journal {
            journal.save(&self.recovery.snapshot()).await?;
        }

        self.cancellation = CancellationToken::new();
        info!(queue_depth = self.recovery.queue_depth(), "Recovery scheduler stopped");
        Ok(())
    }

    /// Whether the background task is running
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Run a single tick and persist the result
    pub async fn tick_once(&self) -> InfraResult<TickSummary> {
        Self::tick(&self.recovery, &self.executor, self.journal.as_ref()).await
    }

    async fn run_loop(
        recovery: Arc<RecoveryManager>,
        executor: Arc<SyncOperationExecutor>,
        journal: Option<RecoveryJournal>,
        tick_interval: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Recovery scheduler loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(tick_interval) => {
                    // Ticks run to completion; dropping one would strand its in-flight jobs
                    if let Err(err) = Self::tick(&recovery, &executor, journal.as_ref()).await {
                        warn!(error = %err, "Failed to persist recovery journal");
                    }
                }
            }
        }
    }

    async fn tick(
        recovery: &RecoveryManager,
        executor: &SyncOperationExecutor,
        journal: Option<&RecoveryJournal>,
    ) -> InfraResult<TickSummary> {
        let summary = recovery.tick(executor).await;
        if summary.due > 0 || summary.purged > 0 {
            info!(
                due = summary.due,
                recovered = summary.recovered,
                rescheduled = summary.rescheduled,
                escalated = summary.escalated,
                failed_terminal = summary.failed_terminal,
                purged = summary.purged,
                "Recovery tick complete"
            );
        }

        if let Some(journal) = journal {
            journal.save(&recovery.snapshot()).await?;
        }
        Ok(summary)
    }
}

impl Drop for RecoveryScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("RecoveryScheduler dropped while running; cancelling task");
            self.cancellation.cancel();
        }
    }
}
