//! Remote collaborator error types
//!
//! Error definitions with transient/permanent classification for retry logic.

use thiserror::Error;

/// Error returned by a remote directory or mailbox inventory call.
///
/// Collaborator implementations map their wire-level failures onto these
/// variants; the engine only ever looks at the classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    // Transient errors (retried)
    /// Remote service is temporarily unavailable or the network failed.
    #[error("remote service unavailable: {message}")]
    Unavailable { message: String },

    /// Remote service throttled the caller.
    #[error("rate limited by remote service{}", retry_after_secs.map(|s| format!(", retry after {s} seconds")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// The remote call did not answer in time.
    #[error("remote call timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    // Permanent errors (never retried)
    /// The remote service rejected the request payload.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// The caller lacks permission for the operation.
    #[error("permission denied for {operation}")]
    PermissionDenied { operation: String },

    /// The addressed object does not exist.
    #[error("object not found: {identifier}")]
    NotFound { identifier: String },

    /// Any other non-retryable failure.
    #[error("remote operation failed: {message}")]
    Permanent { message: String },
}

impl RemoteError {
    /// Check if this error is transient and the call may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Unavailable { .. }
                | RemoteError::RateLimited { .. }
                | RemoteError::Timeout { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Check if the addressed object was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }

    /// Server-provided minimum wait before the next attempt, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RemoteError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            RemoteError::Unavailable { .. } => "UNAVAILABLE",
            RemoteError::RateLimited { .. } => "RATE_LIMITED",
            RemoteError::Timeout { .. } => "TIMEOUT",
            RemoteError::Validation { .. } => "VALIDATION_FAILED",
            RemoteError::PermissionDenied { .. } => "PERMISSION_DENIED",
            RemoteError::NotFound { .. } => "NOT_FOUND",
            RemoteError::Permanent { .. } => "OPERATION_FAILED",
        }
    }

    // Convenience constructors

    /// Create a transient unavailability error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        RemoteError::Unavailable {
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        RemoteError::Validation {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(identifier: impl Into<String>) -> Self {
        RemoteError::NotFound {
            identifier: identifier.into(),
        }
    }

    /// Create a generic permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        RemoteError::Permanent {
            message: message.into(),
        }
    }
}

/// Result type for remote collaborator calls.
pub type RemoteResult<T> = Result<T, RemoteError>;
