//! Error types for store writes and sync orchestration

use std::time::Duration;

use stratasync_common::error::{CommonError, ErrorClassification, ErrorSeverity};
use stratasync_common::{impl_error_classification, impl_error_conversion};
use stratasync_domain::{ErrorKind, OperationId, StratasyncError, TargetId};
use thiserror::Error;

/// Failure reported by a store client for one write
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Client error ({status}): {message}")]
    Client { status: u16, message: String },

    #[error(transparent)]
    Common(CommonError),
}

impl StoreError {
    /// Map an HTTP-style status code onto the store taxonomy
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Authentication(message),
            408 => Self::Timeout(Duration::ZERO),
            429 => Self::ResourceExhausted(message),
            400..=499 => Self::Client { status, message },
            _ => Self::Server { status, message },
        }
    }

    /// Metric label for this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ConnectionReset(_) => ErrorKind::ConnectionReset,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Server { .. } => ErrorKind::ServerError,
            Self::MalformedPayload(_) => ErrorKind::MalformedPayload,
            Self::SchemaViolation(_) => ErrorKind::SchemaViolation,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Client { .. } => ErrorKind::ClientError,
            Self::Common(err) => match err {
                CommonError::Timeout { .. } => ErrorKind::Timeout,
                CommonError::CircuitBreakerOpen { .. } => ErrorKind::CircuitOpen,
                CommonError::TaskCancelled { .. } => ErrorKind::Cancelled,
                CommonError::Serialization { .. } | CommonError::Validation { .. } => {
                    ErrorKind::MalformedPayload
                }
                other if other.is_retryable() => ErrorKind::ServerError,
                _ => ErrorKind::ClientError,
            },
        }
    }
}

impl_error_conversion!(StoreError, Common, with_common);

impl_error_classification!(StoreError, Common,
    Self::Timeout(_) | Self::ConnectionReset(_) | Self::ResourceExhausted(_) => {
        retryable: true,
        severity: ErrorSeverity::Warning,
        critical: false,
    },
    Self::Server { .. } => {
        retryable: true,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::MalformedPayload(_) | Self::SchemaViolation(_) | Self::Client { .. } => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::Authentication(_) => {
        retryable: false,
        severity: ErrorSeverity::Critical,
        critical: true,
    },
);

/// Errors raised by the sync core itself (not by a store)
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Unknown target '{0}'")]
    UnknownTarget(TargetId),

    #[error("Target '{0}' is already registered")]
    DuplicateTarget(TargetId),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation {0} carries no payload")]
    MissingPayload(OperationId),

    #[error("Payload store error: {0}")]
    Payload(String),

    #[error(transparent)]
    Common(CommonError),
}

impl_error_conversion!(SyncError, Common, with_common);

impl_error_classification!(SyncError, Common,
    Self::UnknownTarget(_) | Self::DuplicateTarget(_) | Self::Config(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::MissingPayload(_) => {
        retryable: false,
        severity: ErrorSeverity::Critical,
        critical: true,
    },
    Self::Payload(_) => {
        retryable: true,
        severity: ErrorSeverity::Error,
        critical: false,
    },
);

impl From<StratasyncError> for SyncError {
    fn from(err: StratasyncError) -> Self {
        match err {
            StratasyncError::Config(message) => Self::Config(message),
            other => Self::Config(other.to_string()),
        }
    }
}

/// Result type alias for core operations
pub type SyncResult<T> = Result<T, SyncError>;
