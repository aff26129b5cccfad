//! Mailbox access rights.
//!
//! The engine grants from a fixed set of rights. Send-as is applied through a
//! recipient permission, every other right through a mailbox permission, so
//! each right also reports the [`RightsClass`] it belongs to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A delegated access right on a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MailboxRight {
    /// Open the mailbox and read or manage its contents.
    FullAccess,
    /// Send mail that appears to come from the mailbox owner.
    SendAs,
    /// Send mail on behalf of the mailbox owner.
    SendOnBehalf,
    /// Read the mailbox permission entries.
    ReadPermission,
}

/// Remote operation family a right is granted through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RightsClass {
    /// Mailbox permission entries (full access, read permission, send on behalf).
    Mailbox,
    /// Recipient permission entry for send-as.
    SendAs,
}

impl MailboxRight {
    /// Every supported right, in display order.
    pub const ALL: [MailboxRight; 4] = [
        MailboxRight::FullAccess,
        MailboxRight::SendAs,
        MailboxRight::SendOnBehalf,
        MailboxRight::ReadPermission,
    ];

    /// The canonical kebab-case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullAccess => "full-access",
            Self::SendAs => "send-as",
            Self::SendOnBehalf => "send-on-behalf",
            Self::ReadPermission => "read-permission",
        }
    }

    /// Which remote operation family grants this right.
    #[must_use]
    pub fn class(&self) -> RightsClass {
        match self {
            Self::SendAs => RightsClass::SendAs,
            Self::FullAccess | Self::SendOnBehalf | Self::ReadPermission => RightsClass::Mailbox,
        }
    }
}

impl fmt::Display for MailboxRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MailboxRight {
    type Err = CoreError;

    /// Accepts the kebab-case names as well as the remote system's
    /// PascalCase spellings (`FullAccess`, `SendAs`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "fullaccess" => Ok(Self::FullAccess),
            "sendas" => Ok(Self::SendAs),
            "sendonbehalf" | "sendonbehalfof" => Ok(Self::SendOnBehalf),
            "readpermission" => Ok(Self::ReadPermission),
            _ => Err(CoreError::UnknownRight {
                value: s.to_string(),
            }),
        }
    }
}

/// Split a set of rights by the remote operation that grants them.
///
/// Returns `(mailbox_rights, includes_send_as)`.
#[must_use]
pub fn split_by_class(rights: &BTreeSet<MailboxRight>) -> (BTreeSet<MailboxRight>, bool) {
    let mailbox = rights
        .iter()
        .copied()
        .filter(|r| r.class() == RightsClass::Mailbox)
        .collect();
    (mailbox, rights.contains(&MailboxRight::SendAs))
}
