//! Mailbox permission reconciliation.
//!
//! Makes sure a grantee holds a set of rights on every qualifying mailbox.
//! Each mailbox moves through
//! `Pending → CheckingExisting → Skip | Granting → Success | Failed`:
//! existing grants are read first, compliant mailboxes are skipped, and only
//! the missing rights are added.
//!
//! Reads are retried on transient failures; grants are not. The run deadline
//! is checked before each mailbox, and whatever was processed before it
//! expired is kept in the summary.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use mailsync_connector::{
    FailureKind, FailureRecord, Mailbox, MailboxFilter, MailboxInventory, RetryPolicy, Supervisor,
};
use mailsync_core::{split_by_class, GranteeIdentity, MailboxRight, RunId, TenantId};

use crate::aggregator::{Outcome, OutcomeAggregator};
use crate::config::SyncConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::report::{RunScope, RunSummary};

/// Rights to ensure for one grantee.
#[derive(Debug, Clone)]
pub struct GrantRequest {
    /// Principal receiving the rights.
    pub grantee: GranteeIdentity,
    /// Rights the grantee must hold on every qualifying mailbox.
    pub rights: BTreeSet<MailboxRight>,
    /// Mount full-access mailboxes automatically in the grantee's client.
    pub automap: bool,
    /// Which mailboxes qualify.
    pub filter: MailboxFilter,
}

impl GrantRequest {
    /// Request `rights` for `grantee` on user mailboxes, without automap.
    pub fn new(
        grantee: GranteeIdentity,
        rights: impl IntoIterator<Item = MailboxRight>,
    ) -> ReconcileResult<Self> {
        let rights: BTreeSet<MailboxRight> = rights.into_iter().collect();
        if rights.is_empty() {
            return Err(ReconcileError::InvalidRequest(
                "at least one right must be requested".to_string(),
            ));
        }
        Ok(Self {
            grantee,
            rights,
            automap: false,
            filter: MailboxFilter::user_mailboxes(),
        })
    }

    /// Parse a grantee and right names into a request.
    pub fn parse<I, S>(grantee: &str, rights: I) -> ReconcileResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let grantee = GranteeIdentity::parse(grantee)?;
        let rights = rights
            .into_iter()
            .map(|name| name.as_ref().parse::<MailboxRight>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(grantee, rights)
    }

    #[must_use]
    pub fn with_automap(mut self, automap: bool) -> Self {
        self.automap = automap;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: MailboxFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Per-mailbox processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxState {
    Pending,
    CheckingExisting,
    Skip,
    Granting,
    Success,
    Failed,
}

impl fmt::Display for MailboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::CheckingExisting => "checking_existing",
            Self::Skip => "skip",
            Self::Granting => "granting",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Rights `grantee` effectively holds according to `records`.
///
/// Deny entries and entries for other principals are ignored.
#[must_use]
pub fn effective_rights(
    records: &[mailsync_connector::PermissionRecord],
    grantee: &GranteeIdentity,
) -> BTreeSet<MailboxRight> {
    records
        .iter()
        .filter(|record| !record.deny && grantee.matches(&record.user))
        .flat_map(|record| record.access_rights.iter().copied())
        .collect()
}

/// Ensures delegated mailbox access for a grantee.
pub struct PermissionReconciler {
    inventory: Arc<dyn MailboxInventory>,
    config: SyncConfig,
    tenant: Option<TenantId>,
}

impl PermissionReconciler {
    /// Create a reconciler; rejects invalid configuration.
    pub fn new(inventory: Arc<dyn MailboxInventory>, config: SyncConfig) -> ReconcileResult<Self> {
        config.validate()?;
        Ok(Self {
            inventory,
            config,
            tenant: None,
        })
    }

    /// Attribute runs to a tenant in logs and summaries.
    #[must_use]
    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    /// Request for `grantee` using the configured mailbox scope.
    pub fn request_for(
        &self,
        grantee: GranteeIdentity,
        rights: impl IntoIterator<Item = MailboxRight>,
    ) -> ReconcileResult<GrantRequest> {
        Ok(GrantRequest::new(grantee, rights)?.with_filter(self.config.mailbox_filter()?))
    }

    /// Ensure `request.rights` on every qualifying mailbox.
    ///
    /// Fails only when the mailbox roster cannot be listed. Per-mailbox
    /// failures and deadline expiry are reported in the summary.
    pub async fn reconcile_grants(&self, request: &GrantRequest) -> ReconcileResult<RunSummary> {
        let run_id = RunId::new();
        let supervisor = self.config.supervisor();
        let tenant_label = self.tenant.as_ref().map_or("-", TenantId::as_str);

        info!(
            tenant_id = %tenant_label,
            run_id = %run_id,
            grantee = %request.grantee,
            rights = ?request.rights,
            "Starting permission reconciliation"
        );

        let mailboxes = self.list_qualifying(&supervisor, request).await?;
        let total = mailboxes.len();

        let mut aggregator = OutcomeAggregator::new(run_id, RunScope::Grants, total);
        if let Some(tenant) = &self.tenant {
            aggregator = aggregator.with_tenant(tenant.clone());
        }

        let read_policy = self.config.read_retry_policy();
        let mut timed_out = false;

        for mailbox in &mailboxes {
            if supervisor.deadline().is_exceeded() {
                warn!(
                    run_id = %run_id,
                    attempted = aggregator.result().attempted,
                    total,
                    "Deadline reached, stopping permission reconciliation"
                );
                timed_out = true;
                break;
            }

            let outcome = self
                .reconcile_mailbox(&supervisor, &read_policy, request, mailbox)
                .await;
            timed_out |= outcome.is_timed_out();
            aggregator.add_outcome(&mailbox.identity, outcome);
        }

        let summary = aggregator.summarize(timed_out);
        info!(
            tenant_id = %tenant_label,
            run_id = %run_id,
            created = summary.result.created,
            skipped = summary.result.skipped,
            failed = summary.result.failed,
            attempted = summary.result.attempted,
            total = summary.result.total,
            timed_out = summary.result.timed_out,
            "Permission reconciliation completed"
        );
        Ok(summary)
    }

    async fn list_qualifying(
        &self,
        supervisor: &Supervisor,
        request: &GrantRequest,
    ) -> ReconcileResult<Vec<Mailbox>> {
        let inventory = self.inventory.as_ref();
        let filter = &request.filter;

        let roster = supervisor
            .call(
                "list_mailboxes",
                &self.config.read_retry_policy(),
                move || inventory.list_mailboxes(filter),
            )
            .await
            .map_err(|failure| {
                let record = failure.record();
                error!(error = %record, "Mailbox listing failed");
                ReconcileError::InitialListing {
                    what: "mailboxes",
                    failure: record,
                }
            })?;

        let listed = roster.len();
        let mut seen = HashSet::new();
        let qualifying: Vec<Mailbox> = roster
            .into_iter()
            .filter(|mailbox| filter.matches(mailbox))
            .filter(|mailbox| seen.insert(mailbox.identity.to_lowercase()))
            .collect();

        debug!(
            listed,
            qualifying = qualifying.len(),
            "Mailbox roster filtered"
        );
        Ok(qualifying)
    }

    async fn reconcile_mailbox(
        &self,
        supervisor: &Supervisor,
        read_policy: &RetryPolicy,
        request: &GrantRequest,
        mailbox: &Mailbox,
    ) -> Outcome {
        let inventory = self.inventory.as_ref();
        let grantee = &request.grantee;

        if grantee.matches(&mailbox.primary_smtp_address) || grantee.matches(&mailbox.identity) {
            debug!(mailbox = %mailbox.identity, state = %MailboxState::Skip, "Grantee's own mailbox");
            return Outcome::Skipped;
        }

        debug!(mailbox = %mailbox.identity, state = %MailboxState::CheckingExisting, "Reading grants");
        let lookup = match supervisor
            .call("list_grants", read_policy, move || {
                inventory.list_grants(mailbox, grantee)
            })
            .await
        {
            Ok(lookup) => lookup,
            Err(failure) => {
                let record = failure.record();
                warn!(
                    mailbox = %mailbox.identity,
                    state = %MailboxState::Failed,
                    error = %record,
                    "Could not read existing grants"
                );
                return Outcome::Failed(record);
            }
        };

        let held = effective_rights(&lookup.into_vec(), grantee);
        let missing: BTreeSet<MailboxRight> = request.rights.difference(&held).copied().collect();
        if missing.is_empty() {
            debug!(mailbox = %mailbox.identity, state = %MailboxState::Skip, "Already compliant");
            return Outcome::Skipped;
        }

        debug!(
            mailbox = %mailbox.identity,
            state = %MailboxState::Granting,
            missing = ?missing,
            "Granting missing rights"
        );

        let (mailbox_rights, needs_send_as) = split_by_class(&missing);
        let no_retry = RetryPolicy::none();
        let mut failures: Vec<FailureRecord> = Vec::new();

        if !mailbox_rights.is_empty() {
            let rights = &mailbox_rights;
            let automap = request.automap;
            if let Err(failure) = supervisor
                .call("grant", &no_retry, move || {
                    inventory.grant(mailbox, grantee, rights, automap)
                })
                .await
            {
                failures.push(failure.record());
            }
        }

        if needs_send_as {
            if let Err(failure) = supervisor
                .call("grant_send_as", &no_retry, move || {
                    inventory.grant_send_as(mailbox, grantee)
                })
                .await
            {
                failures.push(failure.record());
            }
        }

        match merge_failures(failures) {
            None => {
                debug!(mailbox = %mailbox.identity, state = %MailboxState::Success, "Rights granted");
                Outcome::Created
            }
            Some(record) => {
                warn!(
                    mailbox = %mailbox.identity,
                    state = %MailboxState::Failed,
                    error = %record,
                    "Grant failed"
                );
                Outcome::Failed(record)
            }
        }
    }
}

/// Fold several failures of one mailbox into a single record keeping every
/// reason.
fn merge_failures(failures: Vec<FailureRecord>) -> Option<FailureRecord> {
    let mut failures = failures.into_iter();
    let first = failures.next()?;
    Some(failures.fold(first, |mut merged, next| {
        if merged.kind != next.kind {
            merged.kind = FailureKind::Permanent;
        }
        if merged.code != next.code {
            merged.code = format!("{},{}", merged.code, next.code);
        }
        merged.message = format!("{}; {}", merged.message, next.message);
        merged
    }))
}
