//! Infrastructure errors and their conversion into core errors

use std::path::PathBuf;

use stratasync_common::error::{CommonError, ErrorSeverity};
use stratasync_common::{impl_error_classification, impl_error_conversion};
use stratasync_core::SyncError;
use stratasync_domain::StratasyncError;
use thiserror::Error;

/// Errors raised by file, journal, metrics and scheduler adapters
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Journal checksum mismatch in {path}: expected {expected}, found {actual}")]
    Checksum { path: PathBuf, expected: String, actual: String },

    #[error("Metrics registration failed: {0}")]
    Metrics(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Domain(#[from] StratasyncError),

    #[error(transparent)]
    Common(CommonError),
}

impl InfraError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

impl_error_conversion!(InfraError, Common, with_common);

impl_error_classification!(InfraError, Common,
    Self::Io { .. } => {
        retryable: true,
        severity: ErrorSeverity::Warning,
        critical: false,
    },
    Self::Serialization(_) | Self::Checksum { .. } => {
        retryable: false,
        severity: ErrorSeverity::Critical,
        critical: true,
    },
    Self::Metrics(_) | Self::Scheduler(_) | Self::Logging(_) | Self::Domain(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
);

impl From<prometheus::Error> for InfraError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}

impl From<InfraError> for SyncError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Common(common) => SyncError::Common(common),
            InfraError::Domain(StratasyncError::Config(message)) => SyncError::Config(message),
            other => SyncError::Payload(other.to_string()),
        }
    }
}

/// Result alias for infrastructure operations
pub type InfraResult<T> = Result<T, InfraError>;
