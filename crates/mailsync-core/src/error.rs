//! Error Types
//!
//! Validation errors raised while constructing the invocation parameters of a
//! reconciliation run.
//!
//! # Example
//!
//! ```
//! use mailsync_core::{CoreError, GranteeIdentity};
//!
//! let err = GranteeIdentity::parse("not an address").unwrap_err();
//! assert!(matches!(err, CoreError::InvalidGrantee { .. }));
//! ```

use serde::Serialize;
use thiserror::Error;

/// Errors raised by the shared mailsync types.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreError {
    /// The grantee is not an email-shaped identity.
    #[error("Invalid grantee '{value}': {reason}")]
    InvalidGrantee {
        /// The rejected input
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// The requested right is not one of the supported access rights.
    #[error("Unknown mailbox right '{value}' (expected one of: full-access, send-as, send-on-behalf, read-permission)")]
    UnknownRight {
        /// The rejected input
        value: String,
    },

    /// The tenant identifier is malformed.
    #[error("Invalid tenant '{value}': {reason}")]
    InvalidTenant {
        /// The rejected input
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Type alias for Results using `CoreError`.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
