//! Grantee identity validation.
//!
//! The principal receiving delegated access must be an email-shaped address.
//! Validation is a practical RFC 5322 subset: one `@`, a non-empty local part,
//! a dotted domain, no whitespace, at most 254 characters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{CoreError, CoreResult};

static EMAIL_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"(?i)^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$",
    )
    .expect("EMAIL_REGEX is a valid regex pattern")
});

/// Maximum address length per RFC 5321.
const MAX_EMAIL_LENGTH: usize = 254;

/// A validated, lowercased grantee address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GranteeIdentity(String);

impl GranteeIdentity {
    /// Validate and normalize a grantee address.
    pub fn parse(value: &str) -> CoreResult<Self> {
        let trimmed = value.trim();
        let reject = |reason: &str| CoreError::InvalidGrantee {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(reject("address is empty"));
        }
        if trimmed.len() > MAX_EMAIL_LENGTH {
            return Err(reject("address exceeds 254 characters"));
        }
        if trimmed.contains(char::is_whitespace) {
            return Err(reject("address contains whitespace"));
        }
        if trimmed.matches('@').count() != 1 {
            return Err(reject("address must contain exactly one '@'"));
        }
        if !EMAIL_REGEX.is_match(trimmed) {
            return Err(reject("address is not email-shaped"));
        }

        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Borrow the normalized address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against another principal string.
    #[must_use]
    pub fn matches(&self, principal: &str) -> bool {
        self.0.eq_ignore_ascii_case(principal.trim())
    }
}

impl fmt::Display for GranteeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GranteeIdentity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for GranteeIdentity {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<GranteeIdentity> for String {
    fn from(id: GranteeIdentity) -> Self {
        id.0
    }
}
