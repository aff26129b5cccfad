//! Strongly Typed Identifiers
//!
//! Newtype identifiers shared by the mailsync crates. Using distinct types
//! keeps a tenant identifier from being passed where a run identifier is
//! expected.
//!
//! # Example
//!
//! ```
//! use mailsync_core::{RunId, TenantId};
//!
//! let run = RunId::new();
//! let tenant: TenantId = "contoso.onmicrosoft.com".parse().unwrap();
//!
//! assert_eq!(tenant.as_str(), "contoso.onmicrosoft.com");
//! assert_eq!(run.to_string().len(), 36);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// A run identifier string that is not a UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// Name of the identifier type being parsed.
    pub id_type: &'static str,
    /// Why the input was rejected.
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Identifier for one reconciliation run.
///
/// Attached to every log event and summary produced by the run so that
/// overlapping runs against different tenants can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Fresh random run id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for RunId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self).map_err(|e| ParseIdError {
            id_type: "RunId",
            message: e.to_string(),
        })
    }
}

/// Identifier of the tenant a reconciliation run targets.
///
/// Tenants are addressed the way the remote directory names them, usually
/// an initial domain such as `contoso.onmicrosoft.com` or a directory GUID.
/// The value is trimmed and lowercased on construction so the same tenant
/// always compares equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and normalize a tenant identifier.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        let normalized = value.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(CoreError::InvalidTenant {
                value: value.to_string(),
                reason: "tenant identifier is empty".to_string(),
            });
        }
        if normalized.contains(char::is_whitespace) {
            return Err(CoreError::InvalidTenant {
                value: value.to_string(),
                reason: "tenant identifier contains whitespace".to_string(),
            });
        }
        Ok(Self(normalized))
    }

    /// Borrow the normalized identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TenantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}
