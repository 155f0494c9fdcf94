//! Shared test helpers for `stratasync-core` integration tests.
//!
//! Scripted store clients and an engine fixture wired to a mock clock and an
//! in-memory metrics sink, so scenarios can focus on behaviour.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use stratasync_common::MockClock;
use stratasync_core::{
    InMemoryMetricsSink, RecoveryHook, StoreClient, StoreError, SyncEngine, WriteAck,
};
use stratasync_domain::{Batch, SourceType, SyncConfig, Target, TargetKind};

/// Store client whose failures are switched on and off by the test
pub struct ScriptedClient {
    calls: AtomicU32,
    failing: AtomicBool,
    fail_first: u32,
    error: fn() -> StoreError,
    latency: Duration,
}

impl ScriptedClient {
    pub fn healthy() -> Self {
        Self::build(false, 0, unavailable)
    }

    pub fn failing(error: fn() -> StoreError) -> Self {
        Self::build(true, 0, error)
    }

    /// Fails the first `n` calls, then succeeds
    pub fn flaky(n: u32, error: fn() -> StoreError) -> Self {
        Self::build(false, n, error)
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn build(failing: bool, fail_first: u32, error: fn() -> StoreError) -> Self {
        Self {
            calls: AtomicU32::new(0),
            failing: AtomicBool::new(failing),
            fail_first,
            error,
            latency: Duration::ZERO,
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreClient for ScriptedClient {
    async fn write(&self, batch: &Batch) -> Result<WriteAck, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.load(Ordering::SeqCst) || call < self.fail_first {
            return Err((self.error)());
        }
        Ok(WriteAck::new(batch.len()))
    }
}

pub fn unavailable() -> StoreError {
    StoreError::from_status(503, "service unavailable")
}

pub fn schema_violation() -> StoreError {
    StoreError::SchemaViolation("column 'ts' does not exist".into())
}

/// Config with millisecond local retry delays so scenarios run fast
pub fn fast_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    for kind in TargetKind::ALL {
        let retry = config.retry.for_kind_mut(kind);
        retry.base_delay_ms = 1;
        retry.max_delay_ms = 2;
        retry.attempt_timeout_ms = 1_000;
        config.pools.for_kind_mut(kind).max_concurrent = 16;
    }
    config
}

pub struct Harness {
    pub engine: SyncEngine,
    pub clock: MockClock,
    pub sink: Arc<InMemoryMetricsSink>,
}

pub fn harness(
    targets: Vec<(&str, TargetKind, Arc<ScriptedClient>)>,
    tweak: impl FnOnce(&mut SyncConfig),
) -> Harness {
    harness_with_hooks(targets, tweak, Vec::new())
}

pub fn harness_with_hooks(
    targets: Vec<(&str, TargetKind, Arc<ScriptedClient>)>,
    tweak: impl FnOnce(&mut SyncConfig),
    hooks: Vec<(TargetKind, Arc<dyn RecoveryHook>)>,
) -> Harness {
    let mut config = fast_config();
    tweak(&mut config);
    for (id, kind, _) in &targets {
        config.targets.push(Target::new(*id, *kind, format!("store://{id}")));
    }

    let clock = MockClock::new();
    let sink = Arc::new(InMemoryMetricsSink::new());
    let mut builder =
        SyncEngine::builder(config).metrics(sink.clone()).clock(Arc::new(clock.clone()));
    for (id, _, client) in targets {
        builder = builder.client(id, client);
    }
    for (kind, hook) in hooks {
        builder = builder.recovery_hook(kind, hook);
    }
    let engine = builder.build().expect("engine should build");
    Harness { engine, clock, sink }
}

pub fn batch() -> Batch {
    Batch::new(SourceType::Database, vec![json!({"id": 1, "value": 42}), json!({"id": 2, "value": 7})])
}

/// Recovery hook that fails its first `fail_first` preparations
pub struct ReconnectHook {
    calls: AtomicU32,
    fail_first: u32,
}

impl ReconnectHook {
    pub fn failing_first(fail_first: u32) -> Self {
        Self { calls: AtomicU32::new(0), fail_first }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecoveryHook for ReconnectHook {
    async fn prepare(&self, target: &Target) -> Result<(), StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(StoreError::ConnectionReset(format!("{} pool not ready", target.target_id)));
        }
        Ok(())
    }
}
