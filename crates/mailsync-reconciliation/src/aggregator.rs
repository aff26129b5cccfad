//! Result aggregation.
//!
//! Accumulates per-item outcomes for one run. The aggregator is owned by the
//! single worker driving the run; [`OutcomeAggregator::add_outcome`] is the
//! only way to change it, and [`OutcomeAggregator::summarize`] consumes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use mailsync_connector::{FailureKind, FailureRecord};
use mailsync_core::{RunId, TenantId};

use crate::report::{RunScope, RunSummary};

/// Outcome of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A remote object or grant was created.
    Created,
    /// A remote object was changed in place.
    Updated,
    /// A remote object was deleted.
    Removed,
    /// Nothing needed doing.
    Skipped,
    /// The item could not be reconciled.
    Failed(FailureRecord),
}

impl Outcome {
    /// Whether the run deadline cut this item's retries short.
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Outcome::Failed(failure) if failure.kind == FailureKind::TimedOut)
    }
}

/// A failed item with its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Item label (shard name, mailbox identity, ...).
    pub item: String,
    /// Failure classification.
    pub kind: FailureKind,
    /// Stable error code.
    pub code: String,
    /// Human-readable reason.
    pub reason: String,
}

/// Counts and failures for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    #[serde(default)]
    pub created: usize,
    #[serde(default)]
    pub updated: usize,
    #[serde(default)]
    pub removed: usize,
    #[serde(default)]
    pub skipped: usize,
    #[serde(default)]
    pub failed: usize,
    /// Items that received an outcome.
    #[serde(default)]
    pub attempted: usize,
    /// Items in scope for the run.
    #[serde(default)]
    pub total: usize,
    /// Whether the run stopped at its deadline.
    #[serde(default)]
    pub timed_out: bool,
    /// Every failed item, in processing order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ItemFailure>,
}

impl ReconciliationResult {
    /// Number of remote changes made.
    #[must_use]
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.removed
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Items in scope that were never attempted.
    #[must_use]
    pub fn not_attempted(&self) -> usize {
        self.total.saturating_sub(self.attempted)
    }

    /// Every item in scope was attempted and none failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.timed_out && self.failed == 0 && self.attempted >= self.total
    }
}

/// Single-owner accumulator for one run.
#[derive(Debug)]
pub struct OutcomeAggregator {
    run_id: RunId,
    scope: RunScope,
    tenant: Option<TenantId>,
    result: ReconciliationResult,
    started_at: DateTime<Utc>,
    start_time: Instant,
}

impl OutcomeAggregator {
    /// Start aggregating a run over `total` items.
    #[must_use]
    pub fn new(run_id: RunId, scope: RunScope, total: usize) -> Self {
        Self {
            run_id,
            scope,
            tenant: None,
            result: ReconciliationResult {
                total,
                ..ReconciliationResult::default()
            },
            started_at: Utc::now(),
            start_time: Instant::now(),
        }
    }

    /// Attribute the run to a tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    /// Record the outcome of one item.
    pub fn add_outcome(&mut self, item: impl Into<String>, outcome: Outcome) {
        self.result.attempted += 1;
        match outcome {
            Outcome::Created => self.result.created += 1,
            Outcome::Updated => self.result.updated += 1,
            Outcome::Removed => self.result.removed += 1,
            Outcome::Skipped => self.result.skipped += 1,
            Outcome::Failed(record) => {
                self.result.failed += 1;
                self.result.failures.push(ItemFailure {
                    item: item.into(),
                    kind: record.kind,
                    code: record.code,
                    reason: record.message,
                });
            }
        }
    }

    /// Counts so far.
    #[must_use]
    pub fn result(&self) -> &ReconciliationResult {
        &self.result
    }

    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Close the run and produce its summary.
    ///
    /// Items in scope beyond those attempted are reported through
    /// `attempted < total`; nothing already recorded is dropped.
    #[must_use]
    pub fn summarize(self, timed_out: bool) -> RunSummary {
        let mut result = self.result;
        result.timed_out = timed_out;
        if result.total < result.attempted {
            result.total = result.attempted;
        }

        RunSummary::new(
            self.run_id,
            self.tenant,
            self.scope,
            result,
            self.started_at,
            self.start_time.elapsed().as_millis() as u64,
        )
    }
}
