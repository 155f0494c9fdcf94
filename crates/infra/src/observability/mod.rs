//! Logging initialisation and metrics export

pub mod logging;
pub mod prometheus_sink;

pub use logging::{env_filter, init_logging};
pub use prometheus_sink::PrometheusMetricsSink;
