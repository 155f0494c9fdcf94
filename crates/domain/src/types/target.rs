//! Downstream targets

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::impl_domain_status_conversions;

/// Stable identifier of a downstream store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Wrap an id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TargetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Family of downstream store; selects retry, breaker and pool settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Transactional SQL stores
    Relational,
    /// Columnar warehouses
    Analytical,
    /// Metric and event stores
    TimeSeries,
    /// Anything else
    Custom,
}

impl_domain_status_conversions!(TargetKind {
    Relational => "relational",
    Analytical => "analytical",
    TimeSeries => "time_series",
    Custom => "custom",
});

impl TargetKind {
    /// Every kind, in configuration order
    pub const ALL: [Self; 4] = [Self::Relational, Self::Analytical, Self::TimeSeries, Self::Custom];
}

/// A configured downstream store
///
/// Targets are created when configuration loads and never change while the
/// process runs. Health is not stored here; it is derived from the target's
/// breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Unique id
    pub target_id: TargetId,
    /// Store kind, selects per-kind settings
    pub kind: TargetKind,
    /// Connection endpoint, opaque to the core
    pub endpoint: String,
}

impl Target {
    /// Describe a target
    pub fn new(target_id: impl Into<TargetId>, kind: TargetKind, endpoint: impl Into<String>) -> Self {
        Self { target_id: target_id.into(), kind, endpoint: endpoint.into() }
    }
}

/// Health derived from breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetHealth {
    /// Breaker closed
    Healthy,
    /// Breaker half-open, probing
    Recovering,
    /// Breaker open, calls short-circuited
    Unavailable,
}

impl_domain_status_conversions!(TargetHealth {
    Healthy => "healthy",
    Recovering => "recovering",
    Unavailable => "unavailable",
});
