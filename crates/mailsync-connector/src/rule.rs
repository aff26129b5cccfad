//! Remote rule object model.
//!
//! Shards and the exception object are both transport rules in the remote
//! directory; they differ only in condition, action and priority.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity the remote directory assigns to a rule object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// Wrap a remote identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// What to do when the disclaimer cannot be inserted into a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    /// Wrap the original message in a new one carrying the disclaimer.
    #[default]
    Wrap,
    /// Deliver the message unchanged.
    Ignore,
    /// Reject the message.
    Reject,
}

/// Disclaimer content appended by every shard. Identical across shards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisclaimerPayload {
    /// HTML body of the disclaimer.
    pub html: String,
    /// Behavior when the disclaimer cannot be applied.
    #[serde(default)]
    pub fallback: FallbackAction,
}

/// Condition under which a rule fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Sender display name contains any of the given words.
    SenderNameContains { words: Vec<String> },
    /// A message header matches the given pattern.
    HeaderMatches { header: String, pattern: String },
}

impl RuleCondition {
    /// Matching terms carried by a shard condition; empty for other conditions.
    #[must_use]
    pub fn member_words(&self) -> &[String] {
        match self {
            RuleCondition::SenderNameContains { words } => words,
            RuleCondition::HeaderMatches { .. } => &[],
        }
    }
}

/// Action a rule performs when its condition matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    /// Append the disclaimer to the message.
    AppendDisclaimer { payload: DisclaimerPayload },
    /// Stop evaluating lower-priority rules.
    StopProcessing,
}

/// A rule object as listed from the remote directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRuleObject {
    /// Remote identity, stable across renames.
    pub id: RuleId,
    /// Display name.
    pub name: String,
    /// Evaluation order; lower runs first.
    pub priority: u32,
    /// Whether the rule is active.
    pub enabled: bool,
    /// Match condition.
    pub condition: RuleCondition,
    /// Action on match.
    pub action: RuleAction,
}

impl RemoteRuleObject {
    /// Matching terms carried by this object.
    #[must_use]
    pub fn member_words(&self) -> &[String] {
        self.condition.member_words()
    }
}

/// Everything needed to create a rule object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Display name.
    pub name: String,
    /// Evaluation order.
    pub priority: u32,
    /// Initial enabled state.
    pub enabled: bool,
    /// Match condition.
    pub condition: RuleCondition,
    /// Action on match.
    pub action: RuleAction,
}

/// In-place update of a rule object.
///
/// There is deliberately no `enabled` field: updates never change whether a
/// rule is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleUpdate {
    /// New display name.
    pub name: String,
    /// New evaluation order.
    pub priority: u32,
    /// New match condition.
    pub condition: RuleCondition,
    /// New action.
    pub action: RuleAction,
}

impl From<&RuleSpec> for RuleUpdate {
    fn from(spec: &RuleSpec) -> Self {
        Self {
            name: spec.name.clone(),
            priority: spec.priority,
            condition: spec.condition.clone(),
            action: spec.action.clone(),
        }
    }
}
