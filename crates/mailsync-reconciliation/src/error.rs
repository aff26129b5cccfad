//! Reconciliation errors.
//!
//! Only run-level failures surface here. Per-item failures never propagate;
//! they are recorded by the [`OutcomeAggregator`](crate::aggregator::OutcomeAggregator).

use mailsync_connector::FailureRecord;
use mailsync_core::{CoreError, TenantId};
use thiserror::Error;

/// Result type for reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors that abort a reconciliation run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The single listing a run depends on failed.
    #[error("Initial listing of {what} failed: {failure}")]
    InitialListing {
        what: &'static str,
        failure: FailureRecord,
    },

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration document could not be parsed.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Request rejected before any remote call.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid identifier or right.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ReconcileError {
    /// Whether a later run could succeed without changing its inputs.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconcileError::InitialListing { failure, .. }
                if failure.kind != mailsync_connector::FailureKind::Permanent
        )
    }
}

/// Errors from the per-tenant scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A run for this tenant is still in flight.
    #[error("Reconciliation already running for tenant {tenant}")]
    AlreadyRunning { tenant: TenantId },

    /// The run task panicked or was cancelled.
    #[error("Reconciliation task for tenant {tenant} failed: {message}")]
    TaskFailed { tenant: TenantId, message: String },

    /// The run itself failed.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}
