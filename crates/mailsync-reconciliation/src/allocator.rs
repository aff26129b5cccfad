//! Batch allocation.
//!
//! Partitions the ordered desired set into fixed-capacity shards. Shard `i`
//! holds `desired[i*capacity .. min((i+1)*capacity, len)]` and is numbered
//! `i + 1`, so the same input always produces the same layout.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::MAX_BATCH_CAPACITY;
use crate::error::{ReconcileError, ReconcileResult};

/// One capacity-bounded slice of the desired set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    /// 0-based position.
    pub index: usize,
    /// 1-based sequence number used in the object name.
    pub sequence: u32,
    /// Evaluation priority; shards follow the exception at priority 0.
    pub priority: u32,
    /// Matching terms held by this shard.
    pub members: Vec<String>,
}

/// Deduplicate and order the desired names.
///
/// Names are trimmed; empty ones are dropped. Ordering is by byte value, so
/// the result does not depend on input order or locale.
#[must_use]
pub fn normalize_desired<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| name.as_ref().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Split `desired` into shards of at most `capacity` members.
///
/// `desired` is expected to be normalized already.
pub fn allocate(desired: &[String], capacity: usize) -> ReconcileResult<Vec<Shard>> {
    if capacity == 0 || capacity > MAX_BATCH_CAPACITY {
        return Err(ReconcileError::InvalidConfig(format!(
            "batch capacity must be between 1 and {MAX_BATCH_CAPACITY}, got {capacity}"
        )));
    }

    desired
        .chunks(capacity)
        .enumerate()
        .map(|(index, members)| {
            let sequence = u32::try_from(index + 1).map_err(|_| {
                ReconcileError::InvalidRequest(format!(
                    "desired set of {} names needs too many shards",
                    desired.len()
                ))
            })?;
            Ok(Shard {
                index,
                sequence,
                priority: sequence,
                members: members.to_vec(),
            })
        })
        .collect()
}
