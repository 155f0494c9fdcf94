//! Process-wide tracing subscriber

use stratasync_domain::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::errors::{InfraError, InfraResult};

/// Build the log filter: `RUST_LOG` wins over the configured level
pub fn env_filter(config: &LoggingConfig) -> InfraResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            InfraError::Logging(format!("invalid log filter '{}': {e}", config.level))
        }),
    }
}

/// Install the global subscriber
///
/// Emits JSON lines when `config.json` is set, plain text otherwise. Fails
/// if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> InfraResult<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true).with_target(true))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init()
    };

    installed.map_err(|e| InfraError::Logging(format!("tracing subscriber already set: {e}")))?;
    tracing::debug!(level = %config.level, json = config.json, "Logging initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_rejects_garbage_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig { level: "stratasync=verbose".into(), json: false };
        assert!(env_filter(&config).is_err());
    }

    #[test]
    fn test_env_filter_accepts_directives() {
        let config = LoggingConfig { level: "info,stratasync_core=debug".into(), json: true };
        assert!(env_filter(&config).is_ok());
    }
}
