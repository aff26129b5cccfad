//! Rule reconciliation.
//!
//! Keeps the shard rule objects and the exception object in the remote
//! directory in line with the desired name set. Each run lists the remote
//! objects once, plans against that snapshot and applies the plan entry by
//! entry through the [`Supervisor`]. A failed entry is recorded and the run
//! moves on to the next one.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use mailsync_connector::{
    Deadline, FailureKind, FailureRecord, RemoteDirectory, RemoteRuleObject, RuleAction,
    RuleCondition, RuleSpec, RuleUpdate, Supervisor,
};
use mailsync_core::{RunId, TenantId};

use crate::aggregator::{Outcome, OutcomeAggregator};
use crate::allocator::{allocate, normalize_desired};
use crate::config::SyncConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::planner::{self, Plan, PlanAction, PlanCounts, PlanEntry, ShardLayout};
use crate::report::{RunScope, RunSummary};

/// The remote rule objects visible to one run, split by role.
///
/// A snapshot also carries the run's deadline: every operation applied
/// against it shares the budget armed when it was taken.
#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    /// Objects whose name starts with the shard prefix.
    pub shards: Vec<RemoteRuleObject>,
    /// The exception object, if present.
    pub exception: Option<RemoteRuleObject>,
    /// Further objects carrying the exception name.
    pub duplicate_exceptions: Vec<RemoteRuleObject>,
    /// Objects matching the listing pattern that this engine does not manage.
    pub foreign: Vec<RemoteRuleObject>,
    supervisor: Supervisor,
}

impl RuleSnapshot {
    /// Split a listing into shards, the exception object and foreign objects.
    ///
    /// When several objects carry the exception name, the one already at
    /// priority 0 (then the lowest id) is kept and the rest are reported as
    /// duplicates.
    ///
    /// The run deadline starts now.
    #[must_use]
    pub fn split(listing: Vec<RemoteRuleObject>, config: &SyncConfig) -> Self {
        Self::split_with(listing, config, config.supervisor())
    }

    fn split_with(
        listing: Vec<RemoteRuleObject>,
        config: &SyncConfig,
        supervisor: Supervisor,
    ) -> Self {
        let prefix = config.shard_prefix.to_lowercase();
        let mut snapshot = Self {
            shards: Vec::new(),
            exception: None,
            duplicate_exceptions: Vec::new(),
            foreign: Vec::new(),
            supervisor,
        };
        let mut exceptions = Vec::new();

        for object in listing {
            if object.name.eq_ignore_ascii_case(&config.exception_name) {
                exceptions.push(object);
            } else if object.name.to_lowercase().starts_with(&prefix) {
                snapshot.shards.push(object);
            } else {
                snapshot.foreign.push(object);
            }
        }

        exceptions.sort_by(|a, b| {
            (a.priority != 0)
                .cmp(&(b.priority != 0))
                .then_with(|| a.id.cmp(&b.id))
        });
        let mut exceptions = exceptions.into_iter();
        snapshot.exception = exceptions.next();
        snapshot.duplicate_exceptions = exceptions.collect();
        snapshot
    }

    /// Deadline of the run this snapshot belongs to.
    #[must_use]
    pub fn deadline(&self) -> &Deadline {
        self.supervisor.deadline()
    }
}

/// What happened to the exception object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExceptionOutcome {
    /// It was missing and has been created disabled.
    CreatedDisabled,
    /// Its match fields or priority were rewritten.
    Updated,
    /// It already matched.
    Unchanged,
    /// It could not be reconciled, or a duplicate of it could not be
    /// removed.
    Failed { failure: FailureRecord },
}

/// Result of a full rule run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRunReport {
    /// Exception object outcome.
    pub exception: ExceptionOutcome,
    /// Shard plan counts.
    pub plan: PlanCounts,
    /// Run summary covering the exception object and every shard.
    pub summary: RunSummary,
}

/// Reconciles shard rule objects and the exception object.
pub struct RuleReconciler {
    directory: Arc<dyn RemoteDirectory>,
    config: SyncConfig,
    layout: ShardLayout,
    tenant: Option<TenantId>,
}

impl RuleReconciler {
    /// Create a reconciler; rejects invalid configuration.
    pub fn new(directory: Arc<dyn RemoteDirectory>, config: SyncConfig) -> ReconcileResult<Self> {
        config.validate()?;
        Ok(Self {
            directory,
            layout: ShardLayout::from(&config),
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

    /// List the managed rule objects once, arming the run deadline.
    pub async fn snapshot(&self) -> ReconcileResult<RuleSnapshot> {
        self.snapshot_with(self.config.supervisor()).await
    }

    /// Compute the shard plan for `desired` without changing anything.
    pub async fn preview<I, S>(&self, desired: I) -> ReconcileResult<Plan>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let snapshot = self.snapshot().await?;
        self.plan_for(&snapshot, desired)
    }

    /// Bring the exception object in line using only `snapshot`.
    ///
    /// Duplicates of the exception object are deleted; if one of them
    /// cannot be, the outcome is `Failed`.
    pub async fn reconcile_exception(&self, snapshot: &RuleSnapshot) -> ExceptionOutcome {
        let mut aggregator = OutcomeAggregator::new(
            RunId::new(),
            RunScope::Rules,
            1 + snapshot.duplicate_exceptions.len(),
        );
        self.apply_exception(snapshot, &mut aggregator).await
    }

    /// Bring the shard objects in line with `desired` using `snapshot`,
    /// within the deadline armed when the snapshot was taken.
    pub async fn reconcile_rules<I, S>(
        &self,
        snapshot: &RuleSnapshot,
        desired: I,
    ) -> ReconcileResult<RunSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let plan = self.plan_for(snapshot, desired)?;
        let mut aggregator = self.aggregator(RunId::new(), plan.len());
        let timed_out = self
            .apply_plan(&snapshot.supervisor, &plan, &mut aggregator)
            .await;
        Ok(aggregator.summarize(timed_out))
    }

    /// Full run: list once, reconcile the exception object, then the shards.
    pub async fn run<I, S>(&self, desired: I) -> ReconcileResult<RuleRunReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let run_id = RunId::new();

        info!(
            tenant_id = %self.tenant_label(),
            run_id = %run_id,
            "Starting rule reconciliation"
        );

        let snapshot = self.snapshot().await?;
        let plan = self.plan_for(&snapshot, desired)?;
        let counts = plan.counts();

        debug!(
            run_id = %run_id,
            current_shards = snapshot.shards.len(),
            foreign = snapshot.foreign.len(),
            create = counts.create,
            update = counts.update,
            delete = counts.delete,
            unchanged = counts.unchanged,
            "Planned shard changes"
        );

        let mut aggregator = self.aggregator(
            run_id,
            1 + snapshot.duplicate_exceptions.len() + plan.len(),
        );
        let exception = self.apply_exception(&snapshot, &mut aggregator).await;
        let timed_out = self
            .apply_plan(&snapshot.supervisor, &plan, &mut aggregator)
            .await;
        let summary = aggregator.summarize(timed_out);

        info!(
            tenant_id = %self.tenant_label(),
            run_id = %run_id,
            created = summary.result.created,
            updated = summary.result.updated,
            removed = summary.result.removed,
            failed = summary.result.failed,
            timed_out = summary.result.timed_out,
            "Rule reconciliation completed"
        );

        Ok(RuleRunReport {
            exception,
            plan: counts,
            summary,
        })
    }

    fn plan_for<I, S>(&self, snapshot: &RuleSnapshot, desired: I) -> ReconcileResult<Plan>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let desired = normalize_desired(desired);
        let shards = allocate(&desired, self.config.batch_capacity)?;
        Ok(planner::plan(&shards, &snapshot.shards, &self.layout))
    }

    fn aggregator(&self, run_id: RunId, total: usize) -> OutcomeAggregator {
        let aggregator = OutcomeAggregator::new(run_id, RunScope::Rules, total);
        match &self.tenant {
            Some(tenant) => aggregator.with_tenant(tenant.clone()),
            None => aggregator,
        }
    }

    fn tenant_label(&self) -> &str {
        self.tenant.as_ref().map_or("-", TenantId::as_str)
    }

    async fn snapshot_with(&self, supervisor: Supervisor) -> ReconcileResult<RuleSnapshot> {
        let directory = self.directory.as_ref();
        let pattern = self.config.name_pattern.as_str();
        let policy = self.config.rule_retry_policy();

        let listing = supervisor
            .call("list_rules", &policy, move || directory.list_rules(pattern))
            .await
            .map_err(|failure| {
                let record = failure.record();
                error!(
                    tenant_id = %self.tenant_label(),
                    pattern,
                    error = %record,
                    "Rule listing failed"
                );
                ReconcileError::InitialListing {
                    what: "rules",
                    failure: record,
                }
            })?;

        Ok(RuleSnapshot::split_with(listing, &self.config, supervisor))
    }

    fn exception_spec(&self) -> RuleSpec {
        RuleSpec {
            name: self.config.exception_name.clone(),
            priority: 0,
            enabled: false,
            condition: RuleCondition::HeaderMatches {
                header: self.config.exception_header.clone(),
                pattern: self.config.exception_header_pattern.clone(),
            },
            action: RuleAction::StopProcessing,
        }
    }

    async fn apply_exception(
        &self,
        snapshot: &RuleSnapshot,
        aggregator: &mut OutcomeAggregator,
    ) -> ExceptionOutcome {
        let supervisor = &snapshot.supervisor;
        let spec = self.exception_spec();
        let outcome = match &snapshot.exception {
            None => self.create_exception(supervisor, &spec).await,
            Some(current)
                if planner::object_fingerprint(current) == planner::spec_fingerprint(&spec) =>
            {
                debug!(exception = %spec.name, "Exception object already matches");
                ExceptionOutcome::Unchanged
            }
            Some(current) => {
                let directory = self.directory.as_ref();
                let id = &current.id;
                let update = RuleUpdate::from(&spec);
                let policy = self.config.rule_retry_policy();
                match supervisor
                    .call("update_rule", &policy, || directory.update_rule(id, &update))
                    .await
                {
                    Ok(()) => {
                        debug!(exception = %spec.name, id = %id, "Exception object updated");
                        ExceptionOutcome::Updated
                    }
                    Err(failure) if failure.error.is_not_found() => {
                        debug!(
                            exception = %spec.name,
                            id = %id,
                            "Exception object vanished, recreating"
                        );
                        self.create_exception(supervisor, &spec).await
                    }
                    Err(failure) => ExceptionOutcome::Failed {
                        failure: failure.record(),
                    },
                }
            }
        };

        match &outcome {
            ExceptionOutcome::CreatedDisabled => aggregator.add_outcome(&spec.name, Outcome::Created),
            ExceptionOutcome::Updated => aggregator.add_outcome(&spec.name, Outcome::Updated),
            ExceptionOutcome::Unchanged => aggregator.add_outcome(&spec.name, Outcome::Skipped),
            ExceptionOutcome::Failed { failure } => {
                warn!(exception = %spec.name, error = %failure, "Exception object not reconciled");
                aggregator.add_outcome(&spec.name, Outcome::Failed(failure.clone()));
            }
        }

        let mut leftover: Option<FailureRecord> = None;
        for duplicate in &snapshot.duplicate_exceptions {
            let label = format!("{} ({})", duplicate.name, duplicate.id);
            let removal = self.delete_object(supervisor, duplicate).await;
            match &removal {
                Outcome::Failed(failure) if leftover.is_none() => {
                    leftover = Some(FailureRecord::new(
                        failure.kind,
                        failure.code.clone(),
                        format!(
                            "duplicate exception object {} not removed: {}",
                            duplicate.id, failure.message
                        ),
                    ));
                }
                _ => {}
            }
            aggregator.add_outcome(label, removal);
        }

        match (outcome, leftover) {
            (ExceptionOutcome::Failed { failure }, _) => ExceptionOutcome::Failed { failure },
            (_, Some(failure)) => ExceptionOutcome::Failed { failure },
            (outcome, None) => outcome,
        }
    }

    async fn create_exception(&self, supervisor: &Supervisor, spec: &RuleSpec) -> ExceptionOutcome {
        let directory = self.directory.as_ref();
        let policy = self.config.rule_retry_policy();
        match supervisor
            .call("create_rule", &policy, move || directory.create_rule(spec))
            .await
        {
            Ok(id) => {
                info!(
                    exception = %spec.name,
                    id = %id,
                    "Exception object created disabled"
                );
                ExceptionOutcome::CreatedDisabled
            }
            Err(failure) => ExceptionOutcome::Failed {
                failure: failure.record(),
            },
        }
    }

    /// Apply the plan. Returns whether the deadline cut it short.
    async fn apply_plan(
        &self,
        supervisor: &Supervisor,
        plan: &Plan,
        aggregator: &mut OutcomeAggregator,
    ) -> bool {
        let mut timed_out = false;
        for entry in plan.execution_order() {
            if supervisor.deadline().is_exceeded() {
                warn!(
                    run_id = %aggregator.run_id(),
                    attempted = aggregator.result().attempted,
                    total = aggregator.result().total,
                    "Deadline reached, stopping rule reconciliation"
                );
                return true;
            }
            let outcome = self.apply_entry(supervisor, entry).await;
            if let Outcome::Failed(failure) = &outcome {
                warn!(shard = %entry.label(), error = %failure, "Shard not reconciled");
            }
            timed_out |= outcome.is_timed_out();
            aggregator.add_outcome(entry.label(), outcome);
        }
        timed_out
    }

    async fn apply_entry(&self, supervisor: &Supervisor, entry: &PlanEntry) -> Outcome {
        let directory = self.directory.as_ref();
        let policy = self.config.rule_retry_policy();

        match (&entry.action, &entry.desired) {
            (PlanAction::Unchanged { id }, _) => {
                debug!(shard = %entry.label(), id = %id, "Shard unchanged");
                Outcome::Skipped
            }
            (PlanAction::Create, Some(spec)) => self.create_shard(supervisor, spec).await,
            (PlanAction::Update { id }, Some(spec)) => {
                let update = RuleUpdate::from(spec);
                match supervisor
                    .call("update_rule", &policy, || directory.update_rule(id, &update))
                    .await
                {
                    Ok(()) => {
                        debug!(shard = %spec.name, id = %id, "Shard updated");
                        Outcome::Updated
                    }
                    Err(failure) if failure.error.is_not_found() => {
                        debug!(shard = %spec.name, id = %id, "Shard vanished, recreating");
                        self.create_shard(supervisor, spec).await
                    }
                    Err(failure) => Outcome::Failed(failure.record()),
                }
            }
            (PlanAction::Delete { id }, _) => {
                match supervisor
                    .call("delete_rule", &policy, move || directory.delete_rule(id))
                    .await
                {
                    Ok(()) => {
                        debug!(shard = %entry.label(), "Shard removed");
                        Outcome::Removed
                    }
                    Err(failure) if failure.error.is_not_found() => {
                        debug!(shard = %entry.label(), "Shard already gone");
                        Outcome::Removed
                    }
                    Err(failure) => Outcome::Failed(failure.record()),
                }
            }
            (PlanAction::Create | PlanAction::Update { .. }, None) => {
                Outcome::Failed(FailureRecord::new(
                    FailureKind::Permanent,
                    "INVALID_PLAN",
                    "plan entry has no desired object",
                ))
            }
        }
    }

    async fn create_shard(&self, supervisor: &Supervisor, spec: &RuleSpec) -> Outcome {
        let directory = self.directory.as_ref();
        let policy = self.config.rule_retry_policy();
        match supervisor
            .call("create_rule", &policy, move || directory.create_rule(spec))
            .await
        {
            Ok(id) => {
                debug!(shard = %spec.name, id = %id, "Shard created");
                Outcome::Created
            }
            Err(failure) => Outcome::Failed(failure.record()),
        }
    }

    async fn delete_object(&self, supervisor: &Supervisor, object: &RemoteRuleObject) -> Outcome {
        let directory = self.directory.as_ref();
        let policy = self.config.rule_retry_policy();
        let id = &object.id;
        match supervisor
            .call("delete_rule", &policy, move || directory.delete_rule(id))
            .await
        {
            Ok(()) => {
                debug!(name = %object.name, id = %id, "Duplicate removed");
                Outcome::Removed
            }
            Err(failure) if failure.error.is_not_found() => Outcome::Removed,
            Err(failure) => {
                warn!(name = %object.name, id = %id, error = %failure, "Duplicate not removed");
                Outcome::Failed(failure.record())
            }
        }
    }
}
