//! Wiring of registry, executor, recovery manager and dispatcher

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use stratasync_common::{SharedClock, SystemClock};
use stratasync_domain::{Batch, SyncConfig, TargetHealth, TargetId, TargetKind};
use tracing::info;

use crate::dispatcher::{DispatchReport, SyncDispatcher};
use crate::errors::{SyncError, SyncResult};
use crate::executor::SyncOperationExecutor;
use crate::metrics::{NoopMetricsSink, SyncMetrics};
use crate::payload::InMemoryPayloadStore;
use crate::ports::{MetricsSink, PayloadStore, RecoveryHook, StoreClient};
use crate::recovery::{RecoveryManager, TickSummary};
use crate::registry::TargetRegistry;

/// Assembled synchronization core
pub struct SyncEngine {
    config: SyncConfig,
    registry: Arc<TargetRegistry>,
    recovery: Arc<RecoveryManager>,
    executor: Arc<SyncOperationExecutor>,
    dispatcher: SyncDispatcher,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("registry", &self.registry)
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Start building an engine from `config`
    pub fn builder(config: SyncConfig) -> SyncEngineBuilder {
        SyncEngineBuilder::new(config)
    }

    /// Validated configuration the engine was built from
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Registered targets with their breakers and pools
    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Executor shared by dispatch and recovery
    pub fn executor(&self) -> &Arc<SyncOperationExecutor> {
        &self.executor
    }

    /// Recovery manager for failed operations
    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    /// Fan-out dispatcher
    pub fn dispatcher(&self) -> &SyncDispatcher {
        &self.dispatcher
    }

    /// Dispatch a batch to the given targets
    pub async fn dispatch(&self, batch: Batch, targets: &[TargetId]) -> DispatchReport {
        self.dispatcher.dispatch(batch, targets).await
    }

    /// Run one recovery pass
    pub async fn tick(&self) -> TickSummary {
        self.recovery.tick(&self.executor).await
    }

    /// Health of every target, sorted by id
    pub fn health(&self) -> Vec<(TargetId, TargetHealth)> {
        self.registry.health_snapshot()
    }

    /// Stop admitting new work on every target
    pub fn shutdown(&self) {
        self.registry.close_pools();
        info!(queue_depth = self.recovery.queue_depth(), "Sync engine shut down");
    }
}

/// Builder for [`SyncEngine`]
///
/// Every target in the configuration needs a store client.
pub struct SyncEngineBuilder {
    config: SyncConfig,
    clients: HashMap<TargetId, Arc<dyn StoreClient>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    payloads: Option<Arc<dyn PayloadStore>>,
    hooks: HashMap<TargetKind, Arc<dyn RecoveryHook>>,
    clock: Option<SharedClock>,
}

impl SyncEngineBuilder {
    /// Builder with in-memory payloads, no-op metrics and the system clock
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            clients: HashMap::new(),
            metrics: None,
            payloads: None,
            hooks: HashMap::new(),
            clock: None,
        }
    }

    /// Store client for `target_id`; every configured target needs one
    #[must_use]
    pub fn client(mut self, target_id: impl Into<TargetId>, client: Arc<dyn StoreClient>) -> Self {
        self.clients.insert(target_id.into(), client);
        self
    }

    /// Metrics sink
    #[must_use]
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Payload store used for recovery jobs
    #[must_use]
    pub fn payload_store(mut self, store: Arc<dyn PayloadStore>) -> Self {
        self.payloads = Some(store);
        self
    }

    /// Run `hook` before every recovery attempt on targets of `kind`
    #[must_use]
    pub fn recovery_hook(mut self, kind: TargetKind, hook: Arc<dyn RecoveryHook>) -> Self {
        self.hooks.insert(kind, hook);
        self
    }

    /// Clock for breakers, retries and recovery scheduling
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate configuration and wire the engine
    ///
    /// Fails when the configuration is invalid or a target has no client.
    pub fn build(mut self) -> SyncResult<SyncEngine> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let metrics = SyncMetrics::new(self.metrics.unwrap_or_else(|| Arc::new(NoopMetricsSink)));
        let payloads = self.payloads.unwrap_or_else(|| Arc::new(InMemoryPayloadStore::new()));

        let registry = Arc::new(TargetRegistry::new(metrics.clone(), Arc::clone(&clock)));
        for target in &self.config.targets {
            let client = self.clients.remove(&target.target_id).ok_or_else(|| {
                SyncError::Config(format!("no store client for target '{}'", target.target_id))
            })?;
            registry.register(target.clone(), client, &self.config)?;
        }
        if let Some(extra) = self.clients.keys().next() {
            return Err(SyncError::UnknownTarget(extra.clone()));
        }

        let recovery = self.hooks.into_iter().fold(
            RecoveryManager::new(
                self.config.recovery.clone(),
                payloads,
                metrics.clone(),
                Arc::clone(&clock),
            )?,
            |manager, (kind, hook)| manager.with_hook(kind, hook),
        );
        let recovery = Arc::new(recovery);
        let executor = Arc::new(
            SyncOperationExecutor::new(Arc::clone(&registry), metrics, Arc::clone(&clock))
                .with_recovery(Arc::clone(&recovery)),
        );
        let dispatcher = SyncDispatcher::new(Arc::clone(&executor), clock);

        info!(targets = registry.len(), "Sync engine ready");
        Ok(SyncEngine { config: self.config, registry, recovery, executor, dispatcher })
    }
}
