//! # Tenant Reconciliation Engine
//!
//! Keeps a tenant's sharded disclaimer rules and delegated mailbox access in
//! line with a desired membership set.
//!
//! ## Overview
//!
//! - Rule path: the desired display names are deduplicated, ordered and cut
//!   into fixed-capacity shards; each shard is one remote rule object. A
//!   singleton exception object at priority 0 short-circuits the shards.
//! - Permission path: a grantee must hold a set of rights on every
//!   qualifying mailbox; compliant mailboxes are skipped and only missing
//!   rights are added.
//!
//! Every run reads remote state afresh, applies the minimal set of changes
//! and returns a [`RunSummary`]. Running twice against unchanged input makes
//! no remote mutation the second time.
//!
//! ## Architecture
//!
//! ```text
//! desired set ──► allocator ──► planner ──► RuleReconciler ──┐
//!                                                            ├─► Supervisor ──► remote
//! GrantRequest ────────────────────► PermissionReconciler ───┘        │
//!                                                                      ▼
//!                                                           OutcomeAggregator ──► RunSummary
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use mailsync_reconciliation::{SyncConfig, TenantEngine};
//!
//! let engine = TenantEngine::new(tenant, directory, inventory, SyncConfig::default())?;
//! let report = engine.reconcile_rules(&display_names).await?;
//! println!("{}", report.summary.message);
//!
//! let request = engine.grant_request(grantee, [MailboxRight::FullAccess])?;
//! let summary = engine.reconcile_grants(&request).await?;
//! ```

pub mod aggregator;
pub mod allocator;
pub mod config;
pub mod engine;
pub mod error;
pub mod permissions;
pub mod planner;
pub mod report;
pub mod rules;
pub mod scheduler;

pub use aggregator::{ItemFailure, Outcome, OutcomeAggregator, ReconciliationResult};
pub use allocator::{allocate, normalize_desired, Shard};
pub use config::{MailboxScope, SyncConfig, MAX_BATCH_CAPACITY};
pub use engine::TenantEngine;
pub use error::{ReconcileError, ReconcileResult, SchedulerError};
pub use permissions::{effective_rights, GrantRequest, MailboxState, PermissionReconciler};
pub use planner::{plan, Plan, PlanAction, PlanCounts, PlanEntry, ShardLayout};
pub use report::{RunScope, RunSummary};
pub use rules::{ExceptionOutcome, RuleReconciler, RuleRunReport, RuleSnapshot};
pub use scheduler::{FlightGuard, TenantScheduler};
