//! Merge contract.
//!
//! A merge keeps one entity and removes the others: every relation pointing
//! at a removed entity is retargeted to the keeper, then the removed entities
//! are deleted. Implementations apply the whole change or none of it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::MergeError;

/// Outcome of a successful merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    /// Entities removed by the merge.
    pub deleted_count: usize,
    /// Relations moved from removed entities to the keeper.
    pub reassigned_relation_count: usize,
}

impl MergeResult {
    /// Adds another merge's counts to this one.
    pub fn accumulate(&mut self, other: Self) {
        self.deleted_count += other.deleted_count;
        self.reassigned_relation_count += other.reassigned_relation_count;
    }
}

/// A checked merge: the keeper is not among the removals, removals are
/// non-empty and free of repeats.
///
/// Existence of the ids is checked by the executor under its write lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    keep_id: EntityId,
    remove_ids: Vec<EntityId>,
}

impl MergePlan {
    /// Checks the shape of a merge.
    ///
    /// Repeated ids in `remove_ids` collapse to their first occurrence.
    ///
    /// # Errors
    /// - `Conflict` if `keep_id` is among `remove_ids`
    /// - `EmptyRemoveSet` if `remove_ids` is empty
    pub fn new(keep_id: EntityId, remove_ids: &[EntityId]) -> Result<Self, MergeError> {
        if remove_ids.contains(&keep_id) {
            return Err(MergeError::Conflict { keep_id });
        }
        if remove_ids.is_empty() {
            return Err(MergeError::EmptyRemoveSet);
        }
        let mut seen = HashSet::with_capacity(remove_ids.len());
        let remove_ids = remove_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        Ok(Self { keep_id, remove_ids })
    }

    /// The surviving entity.
    #[must_use]
    pub const fn keep_id(&self) -> EntityId {
        self.keep_id
    }

    /// Distinct ids to remove, in first-seen order.
    #[must_use]
    pub fn remove_ids(&self) -> &[EntityId] {
        &self.remove_ids
    }

    /// Keeper first, then removals.
    pub fn all_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        std::iter::once(self.keep_id).chain(self.remove_ids.iter().copied())
    }
}

/// Applies merges atomically.
///
/// # Errors
/// - `Conflict` / `EmptyRemoveSet`: see [`MergePlan::new`]
/// - `NotFound`: the keeper or a removed id does not exist
/// - `Transaction`: the change could not be applied; nothing was changed
pub trait MergeExecutor: Send + Sync {
    fn merge(&self, keep_id: EntityId, remove_ids: &[EntityId]) -> Result<MergeResult, MergeError>;
}
