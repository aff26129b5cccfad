//! Run summaries.
//!
//! One [`RunSummary`] is returned per run. It is serializable so callers can
//! log or store it; the engine itself never persists it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use mailsync_core::{RunId, TenantId};

use crate::aggregator::ReconciliationResult;

/// Failures listed by name in the summary message; the rest are counted.
const MESSAGE_FAILURE_LIMIT: usize = 5;

/// What a run reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunScope {
    /// Shard rule objects and the exception object.
    Rules,
    /// Mailbox permission grants.
    Grants,
}

impl std::fmt::Display for RunScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rules => write!(f, "rules"),
            Self::Grants => write!(f, "grants"),
        }
    }
}

/// Summary of one completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run ID.
    pub run_id: RunId,
    /// Tenant the run targeted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    /// What was reconciled.
    pub scope: RunScope,
    /// Counts and failures.
    pub result: ReconciliationResult,
    /// One-line human-readable summary.
    pub message: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run completed.
    pub completed_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl RunSummary {
    pub(crate) fn new(
        run_id: RunId,
        tenant_id: Option<TenantId>,
        scope: RunScope,
        result: ReconciliationResult,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        let message = describe(scope, &result);
        Self {
            run_id,
            tenant_id,
            scope,
            result,
            message,
            started_at,
            completed_at: Utc::now(),
            duration_ms,
        }
    }
}

/// Render the one-line message for a result.
///
/// ```text
/// rules: 1 created, 2 updated, 0 removed, 0 skipped, 0 failed (3 of 3 attempted)
/// grants: 40 created, 0 updated, 0 removed, 0 skipped, 0 failed (40 of 100 attempted; deadline reached, 60 not attempted)
/// ```
#[must_use]
pub fn describe(scope: RunScope, result: &ReconciliationResult) -> String {
    let mut message = format!(
        "{scope}: {} created, {} updated, {} removed, {} skipped, {} failed ({} of {} attempted",
        result.created,
        result.updated,
        result.removed,
        result.skipped,
        result.failed,
        result.attempted,
        result.total,
    );
    if result.timed_out {
        let _ = write!(
            message,
            "; deadline reached, {} not attempted",
            result.not_attempted()
        );
    }
    message.push(')');

    if !result.failures.is_empty() {
        let listed: Vec<String> = result
            .failures
            .iter()
            .take(MESSAGE_FAILURE_LIMIT)
            .map(|f| format!("{}: {}", f.item, f.reason))
            .collect();
        let _ = write!(message, "; failures: {}", listed.join("; "));
        let hidden = result.failures.len().saturating_sub(MESSAGE_FAILURE_LIMIT);
        if hidden > 0 {
            let _ = write!(message, " (+{hidden} more)");
        }
    }
    message
}
