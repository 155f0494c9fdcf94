//! Bulkhead pattern for limiting concurrent operations
//!
//! Each downstream target gets its own bulkhead so a slow store can only tie
//! up its own share of workers. Permits are owned, so they can be held across
//! await points and moved into spawned tasks.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{CommonError, CommonResult};

/// Configuration for bulkhead behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadConfig {
    /// Maximum number of concurrent operations allowed
    pub max_concurrent: usize,
    /// Optional timeout for acquiring a permit; `None` waits indefinitely
    pub acquire_timeout: Option<Duration>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent: 8, acquire_timeout: None }
    }
}

impl BulkheadConfig {
    /// Validate the configuration
    pub fn validate(&self) -> CommonResult<()> {
        if self.max_concurrent == 0 {
            return Err(CommonError::config_field("max_concurrent", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Counters for bulkhead monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadMetrics {
    /// Permits granted so far
    pub total_acquired: u64,
    /// Acquisitions that timed out
    pub timeout_count: u64,
    /// Permits currently held
    pub in_flight: usize,
    /// Capacity of the bulkhead
    pub max_concurrent: usize,
}

impl BulkheadMetrics {
    /// Current utilization between 0.0 and 1.0
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.in_flight as f64 / self.max_concurrent as f64;
        ratio
    }
}

/// Semaphore-backed bulkhead
#[derive(Clone)]
pub struct Bulkhead {
    name: Arc<str>,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    total_acquired: Arc<AtomicU64>,
    timeout_count: Arc<AtomicU64>,
}

impl Bulkhead {
    /// Create a new bulkhead with the given configuration
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> CommonResult<Self> {
        config.validate()?;
        let name: String = name.into();
        Ok(Self {
            name: Arc::from(name),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            total_acquired: Arc::new(AtomicU64::new(0)),
            timeout_count: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    /// Wait for a permit, bounded by the configured timeout
    ///
    /// # Errors
    ///
    /// `CommonError::Timeout` when the timeout elapses, and
    /// `CommonError::TaskCancelled` once the bulkhead has been closed.
    pub async fn acquire(&self) -> CommonResult<BulkheadPermit> {
        let semaphore = Arc::clone(&self.semaphore);
        let acquired = match self.config.acquire_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, semaphore.acquire_owned()).await {
                Ok(result) => result,
                Err(_) => {
                    self.timeout_count.fetch_add(1, Ordering::Relaxed);
                    debug!(bulkhead = %self.name, timeout_ms = timeout.as_millis(), "Bulkhead acquire timed out");
                    return Err(CommonError::timeout(format!("bulkhead:{}", self.name), timeout));
                }
            },
            None => semaphore.acquire_owned().await,
        };

        let permit = acquired.map_err(|_| {
            CommonError::task_cancelled(self.name.to_string(), "bulkhead closed")
        })?;
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        Ok(BulkheadPermit { _permit: permit })
    }

    /// Stop handing out permits; pending and future acquisitions fail
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Permits currently held
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent.saturating_sub(self.semaphore.available_permits())
    }

    /// Get bulkhead metrics
    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            timeout_count: self.timeout_count.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            max_concurrent: self.config.max_concurrent,
        }
    }
}

impl fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bulkhead")
            .field("name", &self.name)
            .field("max_concurrent", &self.config.max_concurrent)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Slot in a [`Bulkhead`], released on drop
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}
