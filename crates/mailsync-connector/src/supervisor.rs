//! Retry and deadline supervision for remote calls.
//!
//! Every remote call made during a run goes through [`Supervisor::call`],
//! which retries transient failures according to a [`RetryPolicy`], stops
//! retrying once the run's [`Deadline`] has passed, and normalizes the final
//! error into a [`FailureRecord`] for the result aggregator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::RemoteError;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Wait `step × attempt` before retry `attempt` (1-based).
    Linear { step: Duration },
    /// Wait `initial × multiplier^(attempt-1)`, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Linear { step } => step.saturating_mul(attempt),
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let millis = initial.as_millis() as f64 * multiplier.powi(exponent);
                let capped = millis.min(max.as_millis() as f64).max(0.0);
                Duration::from_millis(capped as u64)
            }
        }
    }
}

/// Bounded retry configuration for one class of remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay schedule.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::None,
        }
    }

    /// Linear backoff: retry `attempt` waits `step × attempt`.
    #[must_use]
    pub fn linear(max_retries: u32, step: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Linear { step },
        }
    }

    /// Exponential backoff doubling from `initial` up to `max`.
    #[must_use]
    pub fn exponential(max_retries: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Exponential {
                initial,
                multiplier: 2.0,
                max,
            },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3, Duration::from_secs(2))
    }
}

/// Wall-clock budget for a run, measured on the monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    /// Deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget: Some(budget),
        }
    }

    /// A deadline that never expires.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            budget: None,
        }
    }

    /// Time since the deadline was armed.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Configured budget, if any.
    #[must_use]
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Whether the budget has been used up.
    #[must_use]
    pub fn is_exceeded(&self) -> bool {
        self.budget.is_some_and(|budget| self.elapsed() >= budget)
    }

    /// Time left, or `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.budget
            .map(|budget| budget.saturating_sub(self.elapsed()))
    }
}

/// Normalized failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient error that outlived its retries.
    Transient,
    /// Non-retryable error.
    Permanent,
    /// Addressed object was missing.
    NotFound,
    /// Retries were cut short by the run deadline.
    TimedOut,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::NotFound => "not_found",
            FailureKind::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// A failure in the single shape the aggregator consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Classification.
    pub kind: FailureKind,
    /// Stable error code from the remote error.
    pub code: String,
    /// Human-readable reason.
    pub message: String,
}

impl FailureRecord {
    /// Build a record from an arbitrary message.
    pub fn new(kind: FailureKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&RemoteError> for FailureRecord {
    fn from(error: &RemoteError) -> Self {
        let kind = if error.is_not_found() {
            FailureKind::NotFound
        } else if error.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        };
        Self::new(kind, error.error_code(), error.to_string())
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Final error of a supervised call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    /// The last error returned by the remote side.
    pub error: RemoteError,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Whether retries stopped because the deadline passed.
    pub deadline_reached: bool,
}

impl CallFailure {
    /// Normalize into an aggregator record.
    #[must_use]
    pub fn record(&self) -> FailureRecord {
        let mut record = FailureRecord::from(&self.error);
        if self.deadline_reached {
            record.kind = FailureKind::TimedOut;
            record.message = format!(
                "{} (deadline reached after {} attempt(s))",
                record.message, self.attempts
            );
        } else if self.attempts > 1 {
            record.message = format!("{} (after {} attempts)", record.message, self.attempts);
        }
        record
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.record())
    }
}

/// Runs remote calls under a shared deadline.
#[derive(Debug, Clone)]
pub struct Supervisor {
    deadline: Deadline,
    retries_enabled: bool,
}

impl Supervisor {
    /// Supervisor bound to `deadline`.
    #[must_use]
    pub fn new(deadline: Deadline) -> Self {
        Self {
            deadline,
            retries_enabled: true,
        }
    }

    /// Turn retries off globally; every call becomes single-attempt.
    #[must_use]
    pub fn without_retries(mut self) -> Self {
        self.retries_enabled = false;
        self
    }

    /// The deadline shared by all calls.
    #[must_use]
    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Execute `operation`, retrying transient failures per `policy`.
    ///
    /// Non-transient errors are returned immediately. A retry whose backoff
    /// would reach past the deadline is not slept for; the last error is
    /// returned with `deadline_reached` set instead.
    pub async fn call<F, Fut, T>(
        &self,
        label: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_retries = if self.retries_enabled {
            policy.max_retries
        } else {
            0
        };
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_transient() || attempt > max_retries {
                return Err(CallFailure {
                    error,
                    attempts: attempt,
                    deadline_reached: false,
                });
            }

            let mut delay = policy.backoff.delay_for(attempt);
            if let Some(secs) = error.retry_after_secs() {
                delay = delay.max(Duration::from_secs(secs));
            }

            // A retry that cannot start before the deadline is not attempted.
            if self
                .deadline
                .remaining()
                .is_some_and(|remaining| remaining.is_zero() || delay >= remaining)
            {
                debug!(
                    operation = label,
                    attempts = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Deadline reached, not retrying"
                );
                return Err(CallFailure {
                    error,
                    attempts: attempt,
                    deadline_reached: true,
                });
            }

            debug!(
                operation = label,
                attempt,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after transient error"
            );

            tokio::time::sleep(delay).await;
        }
    }
}
