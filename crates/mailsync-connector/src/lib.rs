//! # Tenant Collaborators
//!
//! Abstractions the mailsync reconciliation engine uses to reach a tenant.
//!
//! ## Architecture
//!
//! - [`RemoteDirectory`] - enumerate, create, update and delete rule objects
//! - [`MailboxInventory`] - enumerate mailboxes, read and add permission grants
//! - [`Supervisor`] - retry and deadline supervision around every remote call
//!
//! Implementations classify their failures as [`RemoteError`] variants; the
//! supervisor retries only the transient ones and normalizes the rest into
//! [`FailureRecord`]s.
//!
//! ## Crate Organization
//!
//! - [`error`] - Error types with transient/permanent classification
//! - [`rule`] - Rule object model (shards and the exception object)
//! - [`mailbox`] - Mailbox, inclusion filter and permission records
//! - [`pattern`] - Wildcard name matching for rule listings
//! - [`supervisor`] - Retry policy, backoff, deadline, failure records
//! - [`traits`] - Collaborator traits

pub mod error;
pub mod mailbox;
pub mod pattern;
pub mod rule;
pub mod supervisor;
pub mod traits;

pub use error::{RemoteError, RemoteResult};
pub use mailbox::{
    Mailbox, MailboxFilter, OneOrMany, PermissionLookup, PermissionRecord, RecipientType,
};
pub use pattern::matches_name_pattern;
pub use rule::{
    DisclaimerPayload, FallbackAction, RemoteRuleObject, RuleAction, RuleCondition, RuleId,
    RuleSpec, RuleUpdate,
};
pub use supervisor::{
    Backoff, CallFailure, Deadline, FailureKind, FailureRecord, RetryPolicy, Supervisor,
};
pub use traits::{MailboxInventory, RemoteDirectory};

// Re-export async_trait for collaborator implementors
pub use async_trait::async_trait;
