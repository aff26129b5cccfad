//! Mailbox inventory model.
//!
//! Mailboxes, the inclusion predicate used to select them, and the
//! permission records the inventory reports for a grantee.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use mailsync_core::MailboxRight;

/// Kind of recipient backing a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecipientType {
    /// Mailbox owned by a single user.
    UserMailbox,
    /// Mailbox shared by several users.
    SharedMailbox,
    /// Room resource mailbox.
    RoomMailbox,
    /// Equipment resource mailbox.
    EquipmentMailbox,
    /// Any other recipient kind.
    #[serde(other)]
    Other,
}

impl fmt::Display for RecipientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecipientType::UserMailbox => "UserMailbox",
            RecipientType::SharedMailbox => "SharedMailbox",
            RecipientType::RoomMailbox => "RoomMailbox",
            RecipientType::EquipmentMailbox => "EquipmentMailbox",
            RecipientType::Other => "Other",
        };
        f.write_str(name)
    }
}

/// A mailbox as enumerated by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    /// Identity used to address the mailbox in remote calls.
    pub identity: String,
    /// Mail alias.
    pub alias: String,
    /// Primary SMTP address.
    pub primary_smtp_address: String,
    /// Recipient kind.
    pub recipient_type: RecipientType,
}

/// Inclusion predicate selecting the mailboxes a grant applies to.
///
/// A mailbox qualifies when its recipient type is in scope and its alias
/// matches none of the exclusion patterns.
#[derive(Debug, Clone)]
pub struct MailboxFilter {
    recipient_types: BTreeSet<RecipientType>,
    excluded_aliases: Vec<Regex>,
}

impl MailboxFilter {
    /// Build a filter from a recipient-type scope and compiled exclusions.
    pub fn new(
        recipient_types: impl IntoIterator<Item = RecipientType>,
        excluded_aliases: Vec<Regex>,
    ) -> Self {
        Self {
            recipient_types: recipient_types.into_iter().collect(),
            excluded_aliases,
        }
    }

    /// Filter accepting only user mailboxes.
    #[must_use]
    pub fn user_mailboxes() -> Self {
        Self::new([RecipientType::UserMailbox], Vec::new())
    }

    /// Filter accepting user and shared mailboxes.
    #[must_use]
    pub fn user_and_shared_mailboxes() -> Self {
        Self::new(
            [RecipientType::UserMailbox, RecipientType::SharedMailbox],
            Vec::new(),
        )
    }

    /// Add an alias exclusion.
    #[must_use]
    pub fn excluding(mut self, pattern: Regex) -> Self {
        self.excluded_aliases.push(pattern);
        self
    }

    /// Recipient types in scope.
    pub fn recipient_types(&self) -> &BTreeSet<RecipientType> {
        &self.recipient_types
    }

    /// Alias exclusion patterns.
    pub fn excluded_aliases(&self) -> &[Regex] {
        &self.excluded_aliases
    }

    /// Whether the mailbox qualifies.
    #[must_use]
    pub fn matches(&self, mailbox: &Mailbox) -> bool {
        self.recipient_types.contains(&mailbox.recipient_type)
            && !self
                .excluded_aliases
                .iter()
                .any(|pattern| pattern.is_match(&mailbox.alias))
    }
}

/// A value the remote side reports either bare or as a list.
///
/// Permission lookups return nothing, one record, or several records
/// depending on how many entries exist; every consumer normalizes with
/// [`OneOrMany::into_vec`] before looking at the contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// Several values.
    Many(Vec<T>),
    /// A single bare value.
    One(T),
    /// No value (`null`).
    Empty,
}

impl<T> OneOrMany<T> {
    /// Normalize to a sequence of zero or more values.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(values) => values,
            OneOrMany::One(value) => vec![value],
            OneOrMany::Empty => Vec::new(),
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Empty
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(values: Vec<T>) -> Self {
        OneOrMany::Many(values)
    }
}

/// One permission entry on a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PermissionRecord {
    /// Principal the entry applies to.
    pub user: String,
    /// Rights carried by the entry.
    #[serde(deserialize_with = "deserialize_rights")]
    pub access_rights: Vec<MailboxRight>,
    /// Whether this is a deny entry.
    #[serde(default)]
    pub deny: bool,
    /// Whether the entry is inherited from a parent object.
    #[serde(default)]
    pub is_inherited: bool,
}

impl PermissionRecord {
    /// Allow entry for `user` carrying `rights`.
    pub fn allow(user: impl Into<String>, rights: impl IntoIterator<Item = MailboxRight>) -> Self {
        Self {
            user: user.into(),
            access_rights: rights.into_iter().collect(),
            deny: false,
            is_inherited: false,
        }
    }
}

/// Result of a permission lookup for one mailbox and grantee.
pub type PermissionLookup = OneOrMany<PermissionRecord>;

impl From<PermissionRecord> for PermissionLookup {
    fn from(record: PermissionRecord) -> Self {
        OneOrMany::One(record)
    }
}

/// Rights arrive as a single string, a list, or comma-joined names
/// (`"FullAccess, ReadPermission"`). Unknown rights are skipped.
fn deserialize_rights<'de, D>(deserializer: D) -> Result<Vec<MailboxRight>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = OneOrMany::<String>::deserialize(deserializer)?;
    Ok(raw
        .into_vec()
        .iter()
        .flat_map(|entry| entry.split(','))
        .filter_map(|name| name.parse().ok())
        .collect())
}
