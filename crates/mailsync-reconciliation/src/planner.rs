//! Fingerprint and diff planning.
//!
//! Pure functions from the allocated shards and the current remote shard
//! objects to an ordered [`Plan`]. No remote calls happen here.
//!
//! Current objects are ordered by the numeric suffix of their names and
//! paired with shards by position: a shard with a current counterpart is
//! updated in place (keeping its remote identity), a shard without one is
//! created, and leftover current objects are deleted. When an update would
//! write exactly what is already there, the entry is [`PlanAction::Unchanged`]
//! and costs no remote call.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;

use mailsync_connector::{
    DisclaimerPayload, FallbackAction, RemoteRuleObject, RuleAction, RuleCondition, RuleId,
    RuleSpec,
};

use crate::allocator::Shard;
use crate::config::SyncConfig;

/// What every shard object looks like apart from its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLayout {
    /// Name prefix; the sequence number follows it.
    pub prefix: String,
    /// Disclaimer appended by every shard.
    pub payload: DisclaimerPayload,
    /// Enabled state for newly created shards.
    pub enabled_on_create: bool,
}

impl From<&SyncConfig> for ShardLayout {
    fn from(config: &SyncConfig) -> Self {
        Self {
            prefix: config.shard_prefix.clone(),
            payload: config.disclaimer.clone(),
            enabled_on_create: config.shard_enabled_on_create,
        }
    }
}

impl ShardLayout {
    /// Full remote definition for `shard`.
    #[must_use]
    pub fn spec_for(&self, shard: &Shard) -> RuleSpec {
        RuleSpec {
            name: format!("{}{}", self.prefix, shard.sequence),
            priority: shard.priority,
            enabled: self.enabled_on_create,
            condition: RuleCondition::SenderNameContains {
                words: shard.members.clone(),
            },
            action: RuleAction::AppendDisclaimer {
                payload: self.payload.clone(),
            },
        }
    }
}

/// Planned operation for one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanAction {
    /// No current object at this position.
    Create,
    /// Rewrite the current object in place.
    Update { id: RuleId },
    /// Current object beyond the desired shard count.
    Delete { id: RuleId },
    /// Current object already matches.
    Unchanged { id: RuleId },
}

impl PlanAction {
    /// Whether applying this action issues a remote mutation.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(self, PlanAction::Unchanged { .. })
    }
}

/// One position in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// 0-based shard position.
    pub index: usize,
    /// Operation to apply.
    #[serde(flatten)]
    pub action: PlanAction,
    /// Desired object; absent for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired: Option<RuleSpec>,
    /// Name of the current object at this position, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_name: Option<String>,
}

impl PlanEntry {
    /// Item label used in logs and failure records.
    #[must_use]
    pub fn label(&self) -> String {
        match (&self.action, &self.desired, &self.current_name) {
            (PlanAction::Delete { id }, _, Some(name)) => format!("{name} ({id})"),
            (_, Some(spec), _) => spec.name.clone(),
            (_, None, Some(name)) => name.clone(),
            (_, None, None) => format!("shard #{}", self.index + 1),
        }
    }

    fn target_name(&self) -> Option<String> {
        self.desired.as_ref().map(|spec| spec.name.to_lowercase())
    }
}

/// Count of entries per action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCounts {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub unchanged: usize,
}

/// Ordered reconciliation plan, one entry per position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    entries: Vec<PlanEntry>,
}

impl Plan {
    /// Entries in position order.
    #[must_use]
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries per action.
    #[must_use]
    pub fn counts(&self) -> PlanCounts {
        self.entries
            .iter()
            .fold(PlanCounts::default(), |mut counts, entry| {
                match entry.action {
                    PlanAction::Create => counts.create += 1,
                    PlanAction::Update { .. } => counts.update += 1,
                    PlanAction::Delete { .. } => counts.delete += 1,
                    PlanAction::Unchanged { .. } => counts.unchanged += 1,
                }
                counts
            })
    }

    /// Whether applying the plan would mutate anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.action.is_mutation())
    }

    /// Entries in the order they should be applied.
    ///
    /// Deletes go first so their names are free. Creates and renames then
    /// run in waves: an entry waits while its target name is still held by
    /// another object that has yet to be renamed, so two objects never
    /// carry the same sequence number. Unchanged entries come last.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&PlanEntry> {
        let mut ordered: Vec<&PlanEntry> = self
            .entries
            .iter()
            .filter(|e| matches!(e.action, PlanAction::Delete { .. }))
            .collect();

        let mut pending: Vec<&PlanEntry> = self
            .entries
            .iter()
            .filter(|e| matches!(e.action, PlanAction::Create | PlanAction::Update { .. }))
            .collect();

        while !pending.is_empty() {
            let mut holders: HashMap<String, Vec<usize>> = HashMap::new();
            for entry in &pending {
                if let (PlanAction::Update { .. }, Some(name)) = (&entry.action, &entry.current_name)
                {
                    holders
                        .entry(name.to_lowercase())
                        .or_default()
                        .push(entry.index);
                }
            }

            let (ready, blocked): (Vec<&PlanEntry>, Vec<&PlanEntry>) =
                pending.into_iter().partition(|entry| {
                    let Some(target) = entry.target_name() else {
                        return true;
                    };
                    let keeps_name = entry
                        .current_name
                        .as_ref()
                        .is_some_and(|name| name.to_lowercase() == target);
                    keeps_name
                        || holders
                            .get(&target)
                            .map_or(true, |held_by| held_by.iter().all(|i| *i == entry.index))
                });

            if ready.is_empty() {
                ordered.extend(blocked);
                break;
            }
            ordered.extend(ready);
            pending = blocked;
        }

        ordered.extend(
            self.entries
                .iter()
                .filter(|e| matches!(e.action, PlanAction::Unchanged { .. })),
        );
        ordered
    }
}

/// Parse the trailing decimal number of an object name.
///
/// `"Disclaimer Shard 12"` yields `Some(12)`; names without trailing digits,
/// or with a number too large for `u32`, yield `None`.
#[must_use]
pub fn trailing_sequence(name: &str) -> Option<u32> {
    let trimmed = name.trim_end();
    let digits_start = trimmed
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    trimmed[digits_start..].parse().ok()
}

/// Order current shard objects for positional pairing.
///
/// Ascending by trailing sequence number; objects without one sort last.
/// Ties break by name, then id.
#[must_use]
pub fn order_current(current: &[RemoteRuleObject]) -> Vec<&RemoteRuleObject> {
    let mut ordered: Vec<&RemoteRuleObject> = current.iter().collect();
    ordered.sort_by(|a, b| {
        match (trailing_sequence(&a.name), trailing_sequence(&b.name)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.id.cmp(&b.id))
    });
    ordered
}

/// SHA-256 fingerprint over the fields an update writes.
///
/// Member order does not matter. The enabled flag is excluded because
/// updates never touch it.
#[must_use]
pub fn fingerprint(
    name: &str,
    priority: u32,
    condition: &RuleCondition,
    action: &RuleAction,
) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, name);
    hasher.update(priority.to_be_bytes());

    match condition {
        RuleCondition::SenderNameContains { words } => {
            feed(&mut hasher, "sender_name_contains");
            let mut sorted: Vec<&str> = words.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            hasher.update((sorted.len() as u64).to_be_bytes());
            for word in sorted {
                feed(&mut hasher, word);
            }
        }
        RuleCondition::HeaderMatches { header, pattern } => {
            feed(&mut hasher, "header_matches");
            feed(&mut hasher, header);
            feed(&mut hasher, pattern);
        }
    }

    match action {
        RuleAction::AppendDisclaimer { payload } => {
            feed(&mut hasher, "append_disclaimer");
            feed(&mut hasher, &payload.html);
            let fallback = match payload.fallback {
                FallbackAction::Wrap => "wrap",
                FallbackAction::Ignore => "ignore",
                FallbackAction::Reject => "reject",
            };
            feed(&mut hasher, fallback);
        }
        RuleAction::StopProcessing => feed(&mut hasher, "stop_processing"),
    }

    hex::encode(hasher.finalize())
}

/// Fingerprint of a current remote object.
#[must_use]
pub fn object_fingerprint(object: &RemoteRuleObject) -> String {
    fingerprint(&object.name, object.priority, &object.condition, &object.action)
}

/// Fingerprint of a desired rule definition.
#[must_use]
pub fn spec_fingerprint(spec: &RuleSpec) -> String {
    fingerprint(&spec.name, spec.priority, &spec.condition, &spec.action)
}

fn feed(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

/// Compute the plan for `shards` against the current shard objects.
#[must_use]
pub fn plan(shards: &[Shard], current: &[RemoteRuleObject], layout: &ShardLayout) -> Plan {
    let ordered = order_current(current);
    let positions = shards.len().max(ordered.len());

    let entries = (0..positions)
        .filter_map(|index| {
            let desired = shards.get(index).map(|shard| layout.spec_for(shard));
            let existing = ordered.get(index).copied();

            let action = match (&desired, existing) {
                (Some(_), None) => PlanAction::Create,
                (Some(spec), Some(object)) => {
                    if spec_fingerprint(spec) == object_fingerprint(object) {
                        PlanAction::Unchanged {
                            id: object.id.clone(),
                        }
                    } else {
                        PlanAction::Update {
                            id: object.id.clone(),
                        }
                    }
                }
                (None, Some(object)) => PlanAction::Delete {
                    id: object.id.clone(),
                },
                (None, None) => return None,
            };

            Some(PlanEntry {
                index,
                action,
                desired,
                current_name: existing.map(|object| object.name.clone()),
            })
        })
        .collect();

    Plan { entries }
}
