//! Run configuration.
//!
//! One [`SyncConfig`] is constructed per run and passed to the reconcilers.
//! Every field has a serde default so a partial JSON document is enough.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use mailsync_connector::{
    matches_name_pattern, Deadline, DisclaimerPayload, FallbackAction, MailboxFilter,
    RetryPolicy, Supervisor,
};

use crate::error::{ReconcileError, ReconcileResult};

/// Largest number of matching terms one remote rule object accepts.
pub const MAX_BATCH_CAPACITY: usize = 200;

/// Which recipient types a grant run applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailboxScope {
    /// User mailboxes only.
    #[default]
    UserMailboxes,
    /// User and shared mailboxes.
    UserAndSharedMailboxes,
}

/// Configuration for one reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Listing pattern covering every managed rule object.
    #[serde(default = "default_name_pattern")]
    pub name_pattern: String,
    /// Shard names are this prefix followed by the 1-based sequence number.
    #[serde(default = "default_shard_prefix")]
    pub shard_prefix: String,
    /// Exact name of the exception object.
    #[serde(default = "default_exception_name")]
    pub exception_name: String,
    /// Header the exception object matches on.
    #[serde(default = "default_exception_header")]
    pub exception_header: String,
    /// Header value pattern the exception object matches on.
    #[serde(default = "default_exception_header_pattern")]
    pub exception_header_pattern: String,
    /// Disclaimer appended by every shard.
    #[serde(default = "default_disclaimer")]
    pub disclaimer: DisclaimerPayload,
    /// Enabled state for newly created shards.
    #[serde(default = "default_true")]
    pub shard_enabled_on_create: bool,
    /// Matching terms per shard.
    #[serde(default = "default_batch_capacity")]
    pub batch_capacity: usize,
    /// Retry transient failures at all.
    #[serde(default = "default_true")]
    pub enable_retry: bool,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff step for permission reads, in seconds.
    #[serde(default = "default_read_backoff_secs")]
    pub read_backoff_secs: u64,
    /// First exponential backoff delay for rule calls, in milliseconds.
    #[serde(default = "default_rule_backoff_initial_ms")]
    pub rule_backoff_initial_ms: u64,
    /// Exponential backoff ceiling for rule calls, in milliseconds.
    #[serde(default = "default_rule_backoff_max_ms")]
    pub rule_backoff_max_ms: u64,
    /// Enforce the per-run deadline.
    #[serde(default = "default_true")]
    pub enable_timeout: bool,
    /// Per-run wall-clock budget, in seconds.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// Recipient types grants apply to.
    #[serde(default)]
    pub mailbox_scope: MailboxScope,
    /// Regexes on mailbox aliases that are never granted on.
    #[serde(default = "default_excluded_aliases")]
    pub excluded_aliases: Vec<String>,
}

fn default_name_pattern() -> String {
    "Disclaimer*".to_string()
}

fn default_shard_prefix() -> String {
    "Disclaimer Shard ".to_string()
}

fn default_exception_name() -> String {
    "Disclaimer Exception".to_string()
}

fn default_exception_header() -> String {
    "X-Disclaimer-Exempt".to_string()
}

fn default_exception_header_pattern() -> String {
    "true".to_string()
}

fn default_disclaimer() -> DisclaimerPayload {
    DisclaimerPayload {
        html: "<p>This message was sent from outside the organization.</p>".to_string(),
        fallback: FallbackAction::Wrap,
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_capacity() -> usize {
    MAX_BATCH_CAPACITY
}

fn default_max_retries() -> u32 {
    3
}

fn default_read_backoff_secs() -> u64 {
    2
}

fn default_rule_backoff_initial_ms() -> u64 {
    1000
}

fn default_rule_backoff_max_ms() -> u64 {
    30_000
}

fn default_deadline_secs() -> u64 {
    600
}

fn default_excluded_aliases() -> Vec<String> {
    vec!["^DiscoverySearchMailbox".to_string()]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            name_pattern: default_name_pattern(),
            shard_prefix: default_shard_prefix(),
            exception_name: default_exception_name(),
            exception_header: default_exception_header(),
            exception_header_pattern: default_exception_header_pattern(),
            disclaimer: default_disclaimer(),
            shard_enabled_on_create: true,
            batch_capacity: default_batch_capacity(),
            enable_retry: true,
            max_retries: default_max_retries(),
            read_backoff_secs: default_read_backoff_secs(),
            rule_backoff_initial_ms: default_rule_backoff_initial_ms(),
            rule_backoff_max_ms: default_rule_backoff_max_ms(),
            enable_timeout: true,
            deadline_secs: default_deadline_secs(),
            mailbox_scope: MailboxScope::default(),
            excluded_aliases: default_excluded_aliases(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> ReconcileResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable.
    ///
    /// The shard prefix and exception name must both be visible through
    /// `name_pattern`; an object the listing cannot see would be recreated
    /// on every run.
    pub fn validate(&self) -> ReconcileResult<()> {
        if self.batch_capacity == 0 || self.batch_capacity > MAX_BATCH_CAPACITY {
            return Err(ReconcileError::InvalidConfig(format!(
                "batch_capacity must be between 1 and {MAX_BATCH_CAPACITY}, got {}",
                self.batch_capacity
            )));
        }
        if self.name_pattern.trim().is_empty() {
            return Err(ReconcileError::InvalidConfig(
                "name_pattern must not be empty".to_string(),
            ));
        }
        if self.shard_prefix.trim().is_empty() {
            return Err(ReconcileError::InvalidConfig(
                "shard_prefix must not be empty".to_string(),
            ));
        }
        if self.exception_name.trim().is_empty() {
            return Err(ReconcileError::InvalidConfig(
                "exception_name must not be empty".to_string(),
            ));
        }
        if self
            .exception_name
            .to_ascii_lowercase()
            .starts_with(&self.shard_prefix.to_ascii_lowercase())
        {
            return Err(ReconcileError::InvalidConfig(format!(
                "exception_name '{}' must not start with shard_prefix '{}'",
                self.exception_name, self.shard_prefix
            )));
        }
        if self.exception_header.trim().is_empty() {
            return Err(ReconcileError::InvalidConfig(
                "exception_header must not be empty".to_string(),
            ));
        }

        let first_shard = self.shard_name(1);
        if !matches_name_pattern(&self.name_pattern, &first_shard) {
            return Err(ReconcileError::InvalidConfig(format!(
                "shard name '{first_shard}' is not covered by name_pattern '{}'",
                self.name_pattern
            )));
        }
        if !matches_name_pattern(&self.name_pattern, &self.exception_name) {
            return Err(ReconcileError::InvalidConfig(format!(
                "exception_name '{}' is not covered by name_pattern '{}'",
                self.exception_name, self.name_pattern
            )));
        }

        if self.enable_timeout && self.deadline_secs == 0 {
            return Err(ReconcileError::InvalidConfig(
                "deadline_secs must be positive when enable_timeout is set".to_string(),
            ));
        }

        self.compiled_exclusions().map(|_| ())
    }

    /// Name of the shard with the given 1-based sequence number.
    #[must_use]
    pub fn shard_name(&self, sequence: u32) -> String {
        format!("{}{sequence}", self.shard_prefix)
    }

    /// Inclusion predicate for grant runs.
    pub fn mailbox_filter(&self) -> ReconcileResult<MailboxFilter> {
        let base = match self.mailbox_scope {
            MailboxScope::UserMailboxes => MailboxFilter::user_mailboxes(),
            MailboxScope::UserAndSharedMailboxes => MailboxFilter::user_and_shared_mailboxes(),
        };
        Ok(self
            .compiled_exclusions()?
            .into_iter()
            .fold(base, MailboxFilter::excluding))
    }

    /// Retry policy for permission reads: linear, `step × attempt`.
    #[must_use]
    pub fn read_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(
            self.max_retries,
            Duration::from_secs(self.read_backoff_secs),
        )
    }

    /// Retry policy for rule listing and mutations: exponential.
    #[must_use]
    pub fn rule_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_retries,
            Duration::from_millis(self.rule_backoff_initial_ms),
            Duration::from_millis(self.rule_backoff_max_ms),
        )
    }

    /// Deadline armed now, or unbounded when timeouts are disabled.
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        if self.enable_timeout {
            Deadline::after(Duration::from_secs(self.deadline_secs))
        } else {
            Deadline::unbounded()
        }
    }

    /// Supervisor for a new run.
    #[must_use]
    pub fn supervisor(&self) -> Supervisor {
        let supervisor = Supervisor::new(self.deadline());
        if self.enable_retry {
            supervisor
        } else {
            supervisor.without_retries()
        }
    }

    fn compiled_exclusions(&self) -> ReconcileResult<Vec<Regex>> {
        self.excluded_aliases
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    ReconcileError::InvalidConfig(format!(
                        "invalid alias exclusion '{pattern}': {e}"
                    ))
                })
            })
            .collect()
    }
}
