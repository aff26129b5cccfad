//! Per-tenant engine.
//!
//! Binds one tenant's collaborators and configuration to the rule and
//! permission reconcilers. Every call is an independent run that re-reads
//! remote state; nothing is kept between runs.

use std::sync::Arc;

use mailsync_connector::{MailboxInventory, RemoteDirectory};
use mailsync_core::{GranteeIdentity, MailboxRight, TenantId};

use crate::config::SyncConfig;
use crate::error::ReconcileResult;
use crate::permissions::{GrantRequest, PermissionReconciler};
use crate::planner::Plan;
use crate::report::RunSummary;
use crate::rules::{RuleReconciler, RuleRunReport};

/// Reconciliation entry point for one tenant.
pub struct TenantEngine {
    tenant: TenantId,
    rules: RuleReconciler,
    permissions: PermissionReconciler,
}

impl TenantEngine {
    /// Create an engine for `tenant`.
    ///
    /// # Errors
    /// Returns `ReconcileError::InvalidConfig` if `config` does not validate.
    pub fn new(
        tenant: TenantId,
        directory: Arc<dyn RemoteDirectory>,
        inventory: Arc<dyn MailboxInventory>,
        config: SyncConfig,
    ) -> ReconcileResult<Self> {
        let rules = RuleReconciler::new(directory, config.clone())?.with_tenant(tenant.clone());
        let permissions = PermissionReconciler::new(inventory, config)?.with_tenant(tenant.clone());
        Ok(Self {
            tenant,
            rules,
            permissions,
        })
    }

    /// The tenant this engine targets.
    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// The rule reconciler, for callers that drive snapshot and apply
    /// separately.
    #[must_use]
    pub fn rules(&self) -> &RuleReconciler {
        &self.rules
    }

    /// Reconcile the exception object and the shards against `desired`.
    pub async fn reconcile_rules<I, S>(&self, desired: I) -> ReconcileResult<RuleRunReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.rules.run(desired).await
    }

    /// Plan the shard changes for `desired` without applying them.
    pub async fn preview_rules<I, S>(&self, desired: I) -> ReconcileResult<Plan>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.rules.preview(desired).await
    }

    /// Build a grant request scoped by the configured mailbox filter.
    pub fn grant_request(
        &self,
        grantee: GranteeIdentity,
        rights: impl IntoIterator<Item = MailboxRight>,
    ) -> ReconcileResult<GrantRequest> {
        self.permissions.request_for(grantee, rights)
    }

    /// Ensure `request` on every qualifying mailbox.
    pub async fn reconcile_grants(&self, request: &GrantRequest) -> ReconcileResult<RunSummary> {
        self.permissions.reconcile_grants(request).await
    }
}
