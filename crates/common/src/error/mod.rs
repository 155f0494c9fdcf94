//! Shared error types and classification
//!
//! Three pieces make up the error layer used by every StrataSync crate:
//!
//! 1. **`CommonError`**: the error patterns that appear in more than one
//!    module: timeouts, serialization, persistence, backend failures and
//!    open circuits.
//! 2. **`ErrorClassification`**: how an error behaves under retry, and how
//!    loudly it should be reported.
//! 3. **`ErrorSeverity`**: the severity scale used by logs and alerts.
//!
//! Module errors compose with `CommonError` instead of duplicating it:
//!
//! ```rust,ignore
//! #[derive(Debug, thiserror::Error)]
//! pub enum JournalError {
//!     #[error("Journal checksum mismatch for {0}")]
//!     Corrupted(String),
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//!
//! impl_error_conversion!(JournalError, Common);
//! impl_error_classification!(JournalError, Common,
//!     Self::Corrupted(_) => {
//!         retryable: false,
//!         severity: ErrorSeverity::Critical,
//!         critical: true,
//!     }
//! );
//! ```
//!
//! | Level | Use Case |
//! |-------|----------|
//! | **Info** | Expected conditions (cancelled work) |
//! | **Warning** | Degraded but operational (timeouts, open circuits) |
//! | **Error** | Failure requiring attention (invalid config, rejected writes) |
//! | **Critical** | Integrity at risk (corrupted journals, invariant violations) |

use std::fmt;
use std::time::Duration;

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Common error variants that appear across multiple modules
#[derive(Debug, Clone)]
pub enum CommonError {
    /// Configuration-related errors
    Config { message: String, field: Option<String> },

    /// Circuit breaker is open, preventing operations
    CircuitBreakerOpen { service: String, retry_after: Option<Duration> },

    /// Serialization or deserialization errors
    Serialization { message: String, format: Option<String> },

    /// Data persistence errors (file I/O, journals)
    Persistence { message: String, operation: Option<String> },

    /// Timeout errors
    Timeout { operation: String, duration: Duration },

    /// Network or backend connectivity errors
    Backend { service: String, message: String, is_retryable: bool },

    /// Validation errors
    Validation { field: String, message: String, value: Option<String> },

    /// Task cancellation (async)
    TaskCancelled { task_id: String, reason: Option<String> },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, field } => match field {
                Some(field) => write!(f, "Configuration error in field '{}': {}", field, message),
                None => write!(f, "Configuration error: {}", message),
            },
            Self::CircuitBreakerOpen { service, retry_after } => match retry_after {
                Some(retry) => {
                    write!(f, "Circuit breaker open for '{}' (retry in {:?})", service, retry)
                }
                None => write!(f, "Circuit breaker open for '{}'", service),
            },
            Self::Serialization { message, format } => match format {
                Some(format) => write!(f, "Serialization error ({}): {}", format, message),
                None => write!(f, "Serialization error: {}", message),
            },
            Self::Persistence { message, operation } => match operation {
                Some(op) => write!(f, "Persistence error during '{}': {}", op, message),
                None => write!(f, "Persistence error: {}", message),
            },
            Self::Timeout { operation, duration } => {
                write!(f, "Operation '{}' timed out after {:?}", operation, duration)
            }
            Self::Backend { service, message, .. } => {
                write!(f, "Backend error from '{}': {}", service, message)
            }
            Self::Validation { field, message, value } => match value {
                Some(value) => write!(
                    f,
                    "Validation error for field '{}' (value: '{}'): {}",
                    field, value, message
                ),
                None => write!(f, "Validation error for field '{}': {}", field, message),
            },
            Self::TaskCancelled { task_id, reason } => match reason {
                Some(reason) => write!(f, "Task '{}' cancelled: {}", task_id, reason),
                None => write!(f, "Task '{}' cancelled", task_id),
            },
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitBreakerOpen { .. } | Self::Timeout { .. } => true,
            Self::Backend { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitBreakerOpen { .. } | Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::Config { .. }
            | Self::Serialization { .. }
            | Self::Persistence { .. }
            | Self::Backend { .. }
            | Self::Validation { .. } => ErrorSeverity::Error,
            Self::TaskCancelled { .. } => ErrorSeverity::Info,
        }
    }

    // Criticality is decided by the module error wrapping this one
    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitBreakerOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl CommonError {
    /// Create a configuration error for a specific field
    pub fn config_field<S: Into<String>, F: Into<String>>(field: F, message: S) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    /// Create a circuit breaker error with retry timing
    pub fn circuit_breaker<S: Into<String>>(service: S, retry_after: Option<Duration>) -> Self {
        Self::CircuitBreakerOpen { service: service.into(), retry_after }
    }

    /// Create a serialization error with format information
    pub fn serialization_format<S: Into<String>, F: Into<String>>(format: F, message: S) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }

    /// Create a simple persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence { message: message.into(), operation: None }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    /// Create a backend error
    pub fn backend<S: Into<String>, M: Into<String>>(
        service: S,
        message: M,
        is_retryable: bool,
    ) -> Self {
        Self::Backend { service: service.into(), message: message.into(), is_retryable }
    }

    /// Create a validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation { field: field.into(), message: message.into(), value: None }
    }

    /// Create a validation error with the invalid value
    pub fn validation_with_value<F: Into<String>, M: Into<String>, V: Into<String>>(
        field: F,
        message: M,
        value: V,
    ) -> Self {
        Self::Validation { field: field.into(), message: message.into(), value: Some(value.into()) }
    }

    /// Create a task cancellation error with reason
    pub fn task_cancelled<S: Into<String>, R: Into<String>>(task_id: S, reason: R) -> Self {
        Self::TaskCancelled { task_id: task_id.into(), reason: Some(reason.into()) }
    }
}

/// Error classification trait for consistent handling across modules
///
/// Retry loops consult `is_retryable`; logging and alerting consult
/// `severity` and `is_critical`.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: timeouts, connection resets,
    /// exhausted resources, open circuits, 5xx-style responses.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_format("JSON", err.to_string())
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization_format("TOML", err.to_string())
    }
}

/// Generates `From<serde_json::Error>` and `From<std::io::Error>` for a
/// module error that wraps `CommonError` in `$variant`.
///
/// ```rust,ignore
/// #[derive(Debug, thiserror::Error)]
/// pub enum MyError {
///     #[error(transparent)]
///     Common(#[from] CommonError),
/// }
///
/// impl_error_conversion!(MyError, Common);
/// ```
///
/// Use `impl_error_conversion!(MyError, Common, with_common)` when the
/// variant does not carry `#[from]`.
#[macro_export]
macro_rules! impl_error_conversion {
    ($error_type:ty, $variant:ident) => {
        impl From<serde_json::Error> for $error_type {
            fn from(err: serde_json::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }

        impl From<std::io::Error> for $error_type {
            fn from(err: std::io::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }
    };

    ($error_type:ty, $variant:ident, with_common) => {
        impl From<$crate::error::CommonError> for $error_type {
            fn from(err: $crate::error::CommonError) -> Self {
                Self::$variant(err)
            }
        }

        $crate::impl_error_conversion!($error_type, $variant);
    };
}

/// Implements `ErrorClassification` by delegating the `CommonError` variant
/// and listing the rest explicitly.
///
/// ```rust,ignore
/// impl_error_classification!(MyError, Common,
///     Self::Specific(_) => {
///         retryable: false,
///         severity: ErrorSeverity::Error,
///         critical: false,
///     }
/// );
/// ```
#[macro_export]
macro_rules! impl_error_classification {
    (
        $error_type:ty,
        $common_variant:ident
        $(,
            $variant:pat => {
                retryable: $retryable:expr,
                severity: $severity:expr,
                critical: $critical:expr
                $(, retry_after: $retry_after:expr)?
                $(,)?
            }
        )*
        $(,)?
    ) => {
        impl $crate::error::ErrorClassification for $error_type {
            fn is_retryable(&self) -> bool {
                match self {
                    Self::$common_variant(e) => e.is_retryable(),
                    $(
                        $variant => $retryable,
                    )*
                }
            }

            fn severity(&self) -> $crate::error::ErrorSeverity {
                match self {
                    Self::$common_variant(e) => e.severity(),
                    $(
                        $variant => $severity,
                    )*
                }
            }

            fn is_critical(&self) -> bool {
                match self {
                    Self::$common_variant(e) => e.is_critical(),
                    $(
                        $variant => $critical,
                    )*
                }
            }

            fn retry_after(&self) -> Option<std::time::Duration> {
                match self {
                    Self::$common_variant(e) => e.retry_after(),
                    $(
                        $(
                            $variant => $retry_after,
                        )?
                    )*
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}
