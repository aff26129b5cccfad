//! Collaborator traits
//!
//! The engine talks to the tenant through two services. Implementations own
//! transport, authentication and wire format; the engine only sees these
//! operations and the [`RemoteError`](crate::error::RemoteError)
//! classification.

use async_trait::async_trait;
use std::collections::BTreeSet;

use mailsync_core::{GranteeIdentity, MailboxRight};

use crate::error::RemoteResult;
use crate::mailbox::{Mailbox, MailboxFilter, PermissionLookup};
use crate::rule::{RemoteRuleObject, RuleId, RuleSpec, RuleUpdate};

/// Remote directory holding named rule objects.
#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    /// List every rule object whose name matches `name_pattern`
    /// (`*` wildcards, case-insensitive).
    async fn list_rules(&self, name_pattern: &str) -> RemoteResult<Vec<RemoteRuleObject>>;

    /// Create a rule object.
    ///
    /// # Returns
    /// The remote identity of the new object.
    async fn create_rule(&self, spec: &RuleSpec) -> RemoteResult<RuleId>;

    /// Rename and repopulate an existing rule object in place.
    ///
    /// Must leave the object's enabled state untouched. Returns
    /// `RemoteError::NotFound` if the object no longer exists.
    async fn update_rule(&self, id: &RuleId, update: &RuleUpdate) -> RemoteResult<()>;

    /// Delete a rule object.
    async fn delete_rule(&self, id: &RuleId) -> RemoteResult<()>;
}

/// Mailbox inventory with per-mailbox permission grants.
#[async_trait]
pub trait MailboxInventory: Send + Sync {
    /// Enumerate mailboxes. Implementations may filter server-side; the
    /// engine re-applies `filter` to whatever is returned.
    async fn list_mailboxes(&self, filter: &MailboxFilter) -> RemoteResult<Vec<Mailbox>>;

    /// Read the permission entries `grantee` holds on `mailbox`, across both
    /// mailbox permissions and send-as.
    async fn list_grants(
        &self,
        mailbox: &Mailbox,
        grantee: &GranteeIdentity,
    ) -> RemoteResult<PermissionLookup>;

    /// Add mailbox-permission rights (everything except send-as).
    ///
    /// `automap` controls whether the mailbox is mounted automatically in the
    /// grantee's client; it only affects full access.
    async fn grant(
        &self,
        mailbox: &Mailbox,
        grantee: &GranteeIdentity,
        rights: &BTreeSet<MailboxRight>,
        automap: bool,
    ) -> RemoteResult<()>;

    /// Add the send-as recipient permission.
    async fn grant_send_as(&self, mailbox: &Mailbox, grantee: &GranteeIdentity)
        -> RemoteResult<()>;
}
