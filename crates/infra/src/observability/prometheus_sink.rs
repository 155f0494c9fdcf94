//! Prometheus adapter for the core metrics sink
//!
//! Every metric the core emits is registered up front on a caller-supplied
//! [`Registry`]. Label values are matched by name, so callers may pass labels
//! in any order.

use std::collections::HashMap;

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use stratasync_core::metrics::{
    CIRCUIT_BREAKER_STATE, CIRCUIT_BREAKER_TRANSITIONS_TOTAL, SYNC_DURATION_SECONDS,
    SYNC_ERRORS_TOTAL, SYNC_ESCALATED_JOBS, SYNC_ESCALATIONS_TOTAL, SYNC_OPERATIONS_TOTAL,
    SYNC_RECORDS_PROCESSED_TOTAL, SYNC_RECOVERY_ATTEMPTS_TOTAL, SYNC_RECOVERY_DURATION_SECONDS,
    SYNC_RECOVERY_QUEUE_DEPTH, SYNC_RECOVERY_SUCCESS_TOTAL, SYNC_RETRY_EXHAUSTIONS_TOTAL,
};
use stratasync_core::MetricsSink;
use tracing::debug;

use crate::errors::{InfraError, InfraResult};

const TARGET: &[&str] = &["target"];

// 5ms .. 5min; store writes and recovery passes span both ends
const DURATION_BUCKETS: &[f64] =
    &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0];

struct Family<M> {
    metric: M,
    labels: &'static [&'static str],
}

impl<M> Family<M> {
    /// Label values in declaration order; missing labels become empty strings
    fn values<'a>(&self, labels: &[(&str, &'a str)]) -> Vec<&'a str> {
        self.labels
            .iter()
            .map(|name| labels.iter().find(|(key, _)| key == name).map_or("", |(_, value)| *value))
            .collect()
    }
}

/// [`MetricsSink`] backed by `prometheus` collectors
pub struct PrometheusMetricsSink {
    registry: Registry,
    counters: HashMap<&'static str, Family<IntCounterVec>>,
    histograms: HashMap<&'static str, Family<HistogramVec>>,
    gauges: HashMap<&'static str, Family<GaugeVec>>,
}

impl std::fmt::Debug for PrometheusMetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetricsSink")
            .field("counters", &self.counters.len())
            .field("histograms", &self.histograms.len())
            .field("gauges", &self.gauges.len())
            .finish_non_exhaustive()
    }
}

impl PrometheusMetricsSink {
    /// Register every sync metric on `registry`
    ///
    /// # Errors
    /// Returns `InfraError::Metrics` if a metric is already registered.
    pub fn new(registry: Registry) -> InfraResult<Self> {
        let mut sink = Self {
            registry,
            counters: HashMap::new(),
            histograms: HashMap::new(),
            gauges: HashMap::new(),
        };

        sink.counter(SYNC_OPERATIONS_TOTAL, "Sync operations by final status", &["target", "status"])?;
        sink.counter(SYNC_ERRORS_TOTAL, "Failed write attempts by error kind", &["target", "error_kind"])?;
        sink.counter(SYNC_RECORDS_PROCESSED_TOTAL, "Records written to the target", TARGET)?;
        sink.counter(SYNC_RETRY_EXHAUSTIONS_TOTAL, "Operations that exhausted local retries", TARGET)?;
        sink.counter(SYNC_RECOVERY_ATTEMPTS_TOTAL, "Recovery attempts", TARGET)?;
        sink.counter(SYNC_RECOVERY_SUCCESS_TOTAL, "Jobs recovered", TARGET)?;
        sink.counter(SYNC_ESCALATIONS_TOTAL, "Jobs escalated for manual intervention", TARGET)?;
        sink.counter(
            CIRCUIT_BREAKER_TRANSITIONS_TOTAL,
            "Circuit breaker state transitions",
            &["target", "from", "to"],
        )?;

        sink.histogram(SYNC_DURATION_SECONDS, "Operation duration including local retries", TARGET)?;
        sink.histogram(SYNC_RECOVERY_DURATION_SECONDS, "Recovery attempt duration", TARGET)?;

        sink.gauge(SYNC_ESCALATED_JOBS, "Escalated jobs awaiting intervention", TARGET)?;
        sink.gauge(SYNC_RECOVERY_QUEUE_DEPTH, "Jobs scheduled for recovery", &[])?;
        sink.gauge(
            CIRCUIT_BREAKER_STATE,
            "Circuit breaker state (0=closed, 1=half-open, 2=open)",
            TARGET,
        )?;

        Ok(sink)
    }

    /// Register on a fresh private registry
    pub fn with_new_registry() -> InfraResult<Self> {
        Self::new(Registry::new())
    }

    /// Registry the sink registers into
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn render(&self) -> InfraResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| InfraError::Metrics(e.to_string()))
    }

    fn counter(
        &mut self,
        name: &'static str,
        help: &str,
        labels: &'static [&'static str],
    ) -> InfraResult<()> {
        let metric = IntCounterVec::new(Opts::new(name, help), labels)?;
        self.registry.register(Box::new(metric.clone()))?;
        self.counters.insert(name, Family { metric, labels });
        Ok(())
    }

    fn histogram(
        &mut self,
        name: &'static str,
        help: &str,
        labels: &'static [&'static str],
    ) -> InfraResult<()> {
        let opts = HistogramOpts::new(name, help).buckets(DURATION_BUCKETS.to_vec());
        let metric = HistogramVec::new(opts, labels)?;
        self.registry.register(Box::new(metric.clone()))?;
        self.histograms.insert(name, Family { metric, labels });
        Ok(())
    }

    fn gauge(
        &mut self,
        name: &'static str,
        help: &str,
        labels: &'static [&'static str],
    ) -> InfraResult<()> {
        let metric = GaugeVec::new(Opts::new(name, help), labels)?;
        self.registry.register(Box::new(metric.clone()))?;
        self.gauges.insert(name, Family { metric, labels });
        Ok(())
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)], value: u64) {
        match self.counters.get(name) {
            Some(family) => family.metric.with_label_values(&family.values(labels)).inc_by(value),
            None => debug!(metric = name, "Unregistered counter ignored"),
        }
    }

    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        match self.histograms.get(name) {
            Some(family) => family.metric.with_label_values(&family.values(labels)).observe(value),
            None => debug!(metric = name, "Unregistered histogram ignored"),
        }
    }

    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        match self.gauges.get(name) {
            Some(family) => family.metric.with_label_values(&family.values(labels)).set(value),
            None => debug!(metric = name, "Unregistered gauge ignored"),
        }
    }
}
