//! mailsync Core Library
//!
//! Shared types for the mailsync reconciliation crates.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (`TenantId`, `RunId`)
//! - [`grantee`] - Validated grantee addresses
//! - [`rights`] - The supported mailbox access rights
//! - [`error`] - Validation error types (`CoreError`)
//!
//! # Example
//!
//! ```
//! use mailsync_core::{GranteeIdentity, MailboxRight, TenantId};
//!
//! let tenant: TenantId = "contoso.onmicrosoft.com".parse().unwrap();
//! let grantee = GranteeIdentity::parse("helpdesk@contoso.com").unwrap();
//! let right: MailboxRight = "full-access".parse().unwrap();
//!
//! assert_eq!(right, MailboxRight::FullAccess);
//! assert_eq!(grantee.as_str(), "helpdesk@contoso.com");
//! assert_eq!(tenant.as_str(), "contoso.onmicrosoft.com");
//! ```

pub mod error;
pub mod grantee;
pub mod ids;
pub mod rights;

pub use error::{CoreError, CoreResult};
pub use grantee::GranteeIdentity;
pub use ids::{ParseIdError, RunId, TenantId};
pub use rights::{split_by_class, MailboxRight, RightsClass};
