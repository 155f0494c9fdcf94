//! Per-target resources keyed by target id
//!
//! Each registered target owns one circuit breaker, one store client, one
//! worker pool and one retry policy. Entries are created when configuration
//! loads and live for the rest of the process.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use stratasync_common::resilience::TransitionListener;
use stratasync_common::{
    Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, CircuitState, SharedClock,
};
use stratasync_domain::{SyncConfig, Target, TargetHealth, TargetId, TargetKind};
use tracing::{info, warn};

use crate::errors::{SyncError, SyncResult};
use crate::metrics::SyncMetrics;
use crate::ports::StoreClient;
use crate::retry::RetryPolicy;

/// Resources owned on behalf of one target
pub struct TargetEntry {
    target: Target,
    breaker: CircuitBreaker,
    client: Arc<dyn StoreClient>,
    pool: Bulkhead,
    retry: RetryPolicy,
}

impl fmt::Debug for TargetEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetEntry")
            .field("target", &self.target)
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl TargetEntry {
    /// Static description of the target
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Breaker guarding writes to the target
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Client used for writes
    pub fn client(&self) -> &Arc<dyn StoreClient> {
        &self.client
    }

    /// Worker pool bounding concurrent writes
    pub fn pool(&self) -> &Bulkhead {
        &self.pool
    }

    /// Local retry policy for the target kind
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Health derived from the breaker state
    pub fn health(&self) -> TargetHealth {
        health_from_state(self.breaker.state())
    }
}

/// Map breaker state onto target health
pub fn health_from_state(state: CircuitState) -> TargetHealth {
    match state {
        CircuitState::Closed => TargetHealth::Healthy,
        CircuitState::HalfOpen => TargetHealth::Recovering,
        CircuitState::Open => TargetHealth::Unavailable,
    }
}

/// Registry of targets and their breakers
pub struct TargetRegistry {
    entries: DashMap<TargetId, Arc<TargetEntry>>,
    metrics: SyncMetrics,
    clock: SharedClock,
}

impl fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetRegistry").field("targets", &self.entries.len()).finish()
    }
}

impl TargetRegistry {
    /// Empty registry
    pub fn new(metrics: SyncMetrics, clock: SharedClock) -> Self {
        Self { entries: DashMap::new(), metrics, clock }
    }

    /// Register a target with settings for its kind taken from `config`
    pub fn register(
        &self,
        target: Target,
        client: Arc<dyn StoreClient>,
        config: &SyncConfig,
    ) -> SyncResult<Arc<TargetEntry>> {
        if self.entries.contains_key(&target.target_id) {
            return Err(SyncError::DuplicateTarget(target.target_id));
        }

        let entry = Arc::new(self.build_entry(target, client, config)?);
        let target_id = entry.target.target_id.clone();

        match self.entries.entry(target_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(SyncError::DuplicateTarget(target_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&entry));
            }
        }

        self.metrics.breaker_state(target_id.as_str(), CircuitState::Closed);
        info!(
            target_id = %target_id,
            kind = %entry.target.kind,
            max_attempts = entry.retry.max_attempts(),
            pool_size = entry.pool.metrics().max_concurrent,
            "Registered sync target"
        );
        Ok(entry)
    }

    fn build_entry(
        &self,
        target: Target,
        client: Arc<dyn StoreClient>,
        config: &SyncConfig,
    ) -> SyncResult<TargetEntry> {
        let kind = target.kind;
        let breaker = CircuitBreaker::with_clock(
            target.target_id.as_str(),
            breaker_config(config, kind)?,
            Arc::clone(&self.clock),
        )?
        .with_listener(self.transition_listener());

        let pool_settings = config.pools.for_kind(kind);
        let pool = Bulkhead::new(
            target.target_id.as_str(),
            BulkheadConfig {
                max_concurrent: pool_settings.max_concurrent,
                acquire_timeout: pool_settings.acquire_timeout(),
            },
        )?;

        let retry = RetryPolicy::from_settings(config.retry.for_kind(kind))?;

        Ok(TargetEntry { target, breaker, client, pool, retry })
    }

    fn transition_listener(&self) -> TransitionListener {
        let metrics = self.metrics.clone();
        Arc::new(move |target: &str, from: CircuitState, to: CircuitState| {
            metrics.breaker_state(target, to);
            metrics.breaker_transition(target, from, to);
            match to {
                CircuitState::Open => {
                    warn!(target_id = target, from = from.label(), "Circuit opened");
                }
                _ => info!(target_id = target, from = from.label(), to = to.label(), "Circuit transition"),
            }
        })
    }

    /// Entry for `target_id`
    ///
    /// Fails with `UnknownTarget` when nothing is registered under that id.
    pub fn get(&self, target_id: &TargetId) -> SyncResult<Arc<TargetEntry>> {
        self.entries
            .get(target_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SyncError::UnknownTarget(target_id.clone()))
    }

    /// Whether `target_id` is registered
    pub fn contains(&self, target_id: &TargetId) -> bool {
        self.entries.contains_key(target_id)
    }

    /// Registered targets, sorted by id
    pub fn targets(&self) -> Vec<Target> {
        let mut targets: Vec<Target> =
            self.entries.iter().map(|entry| entry.value().target.clone()).collect();
        targets.sort_by(|a, b| a.target_id.cmp(&b.target_id));
        targets
    }

    /// Registered ids, sorted
    pub fn target_ids(&self) -> Vec<TargetId> {
        self.targets().into_iter().map(|t| t.target_id).collect()
    }

    /// Health of one target
    pub fn health(&self, target_id: &TargetId) -> SyncResult<TargetHealth> {
        Ok(self.get(target_id)?.health())
    }

    /// Health of every target, sorted by id
    pub fn health_snapshot(&self) -> Vec<(TargetId, TargetHealth)> {
        let mut snapshot: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().health()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    /// Close every worker pool; in-flight operations finish, new ones fail
    pub fn close_pools(&self) {
        for entry in self.entries.iter() {
            entry.value().pool.close();
        }
    }

    /// Registered targets
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no target is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn breaker_config(config: &SyncConfig, kind: TargetKind) -> SyncResult<CircuitBreakerConfig> {
    let settings = config.breaker.for_kind(kind);
    Ok(CircuitBreakerConfig::builder()
        .failure_threshold(settings.failure_threshold)
        .success_threshold(settings.success_threshold)
        .failure_window(settings.failure_window())
        .open_duration(settings.open_duration())
        .max_open_duration(settings.max_open_duration())
        .build()?)
}
