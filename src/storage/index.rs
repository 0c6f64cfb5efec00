//! In-memory directory index shared by the storage backends.
//!
//! Every mutation is split into a `check_*` step that only reads and an
//! `apply_*` step that cannot fail. Backends run the check, make the change
//! durable if they need to, then apply it, so a failed check or a failed log
//! write leaves the index untouched.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, EntityKind, NamedEntity};
use crate::error::MergeError;
use crate::merge::{MergePlan, MergeResult};
use crate::similarity::normalize_name;
use crate::storage::traits::StorageError;
use crate::usage::{Relation, RelationId, Usage};

/// A fully resolved merge: which relations move and which entities go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeChange {
    /// Entity that survives.
    pub keep_id: EntityId,
    /// Entities deleted by the merge.
    pub remove_ids: Vec<EntityId>,
    /// Relations retargeted from a removed entity to the keeper.
    pub reassigned: Vec<RelationId>,
    /// When the merge was planned; stamped on moved relations.
    pub at: DateTime<Utc>,
}

/// Entities and relations with secondary indexes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryIndex {
    entities: HashMap<EntityId, NamedEntity>,
    /// Insertion order, so listings are stable across restarts.
    order: BTreeMap<u64, EntityId>,
    seq_by_id: HashMap<EntityId, u64>,
    next_seq: u64,
    by_name: HashMap<String, BTreeSet<EntityId>>,
    relations: HashMap<RelationId, Relation>,
    by_target: HashMap<EntityId, BTreeSet<RelationId>>,
}

impl DirectoryIndex {
    /// Number of entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of relations.
    #[must_use]
    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Entity by id.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&NamedEntity> {
        self.entities.get(&id)
    }

    /// Whether an entity with `id` exists.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Entities in insertion order, optionally of one kind.
    #[must_use]
    pub fn list(&self, kind: Option<&EntityKind>) -> Vec<NamedEntity> {
        self.order
            .values()
            .filter_map(|id| self.entities.get(id))
            .filter(|e| kind.map_or(true, |k| &e.kind == k))
            .cloned()
            .collect()
    }

    /// Entities whose normalized name equals the normalized `name`.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Vec<NamedEntity> {
        let Some(ids) = self.by_name.get(&normalize_name(name)) else {
            return Vec::new();
        };
        let mut found: Vec<(u64, NamedEntity)> = ids
            .iter()
            .filter_map(|id| Some((*self.seq_by_id.get(id)?, self.entities.get(id)?.clone())))
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        found.into_iter().map(|(_, e)| e).collect()
    }

    /// Relation by id.
    #[must_use]
    pub fn get_relation(&self, id: RelationId) -> Option<&Relation> {
        self.relations.get(&id)
    }

    /// Relations targeting `target`, oldest first.
    #[must_use]
    pub fn relations_for(&self, target: EntityId) -> Vec<Relation> {
        let mut found: Vec<Relation> = self
            .by_target
            .get(&target)
            .into_iter()
            .flatten()
            .filter_map(|id| self.relations.get(id).cloned())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        found
    }

    /// Per-kind reference counts for `target`.
    #[must_use]
    pub fn usage_for(&self, target: EntityId) -> Usage {
        self.by_target
            .get(&target)
            .into_iter()
            .flatten()
            .filter_map(|id| self.relations.get(id))
            .collect()
    }

    fn reference_count(&self, target: EntityId) -> usize {
        self.by_target.get(&target).map_or(0, BTreeSet::len)
    }

    // --- entities ---

    /// Fails if the id is taken.
    pub fn check_insert(&self, entity: &NamedEntity) -> Result<(), StorageError> {
        if self.entities.contains_key(&entity.id) {
            return Err(StorageError::DuplicateKey(entity.id.to_string()));
        }
        Ok(())
    }

    /// Inserts an entity checked by [`Self::check_insert`].
    pub fn apply_insert(&mut self, entity: NamedEntity) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, entity.id);
        self.seq_by_id.insert(entity.id, seq);
        self.by_name
            .entry(normalize_name(&entity.name))
            .or_default()
            .insert(entity.id);
        self.entities.insert(entity.id, entity);
    }

    /// Fails if the entity is missing or its version does not grow.
    pub fn check_update(&self, entity: &NamedEntity) -> Result<(), StorageError> {
        let prev = self
            .entities
            .get(&entity.id)
            .ok_or(StorageError::EntityNotFound(entity.id))?;
        if entity.version <= prev.version {
            return Err(StorageError::BackendError(format!(
                "entity version must increase on update: id={} prev={} new={}",
                entity.id, prev.version, entity.version
            )));
        }
        Ok(())
    }

    /// Replaces an entity checked by [`Self::check_update`].
    pub fn apply_update(&mut self, entity: NamedEntity) {
        if let Some(prev) = self.entities.get(&entity.id) {
            let prev_key = normalize_name(&prev.name);
            let new_key = normalize_name(&entity.name);
            if prev_key != new_key {
                self.unindex_name(&prev_key, entity.id);
                self.by_name.entry(new_key).or_default().insert(entity.id);
            }
        }
        self.entities.insert(entity.id, entity);
    }

    /// Fails if the entity is missing or still referenced.
    pub fn check_delete(&self, id: EntityId) -> Result<(), StorageError> {
        if !self.entities.contains_key(&id) {
            return Err(StorageError::EntityNotFound(id));
        }
        let count = self.reference_count(id);
        if count > 0 {
            return Err(StorageError::EntityReferenced { id, count });
        }
        Ok(())
    }

    /// Removes an entity checked by [`Self::check_delete`].
    pub fn apply_delete(&mut self, id: EntityId) {
        let Some(prev) = self.entities.remove(&id) else {
            return;
        };
        self.unindex_name(&normalize_name(&prev.name), id);
        if let Some(seq) = self.seq_by_id.remove(&id) {
            self.order.remove(&seq);
        }
        self.by_target.remove(&id);
    }

    fn unindex_name(&mut self, key: &str, id: EntityId) {
        if let Some(set) = self.by_name.get_mut(key) {
            set.remove(&id);
            if set.is_empty() {
                self.by_name.remove(key);
            }
        }
    }

    // --- relations ---

    /// Fails if the id is taken or the target does not exist.
    pub fn check_insert_relation(&self, relation: &Relation) -> Result<(), StorageError> {
        if self.relations.contains_key(&relation.id) {
            return Err(StorageError::DuplicateKey(relation.id.to_string()));
        }
        if !self.entities.contains_key(&relation.target) {
            return Err(StorageError::EntityNotFound(relation.target));
        }
        Ok(())
    }

    /// Inserts a relation checked by [`Self::check_insert_relation`].
    pub fn apply_insert_relation(&mut self, relation: Relation) {
        self.by_target
            .entry(relation.target)
            .or_default()
            .insert(relation.id);
        self.relations.insert(relation.id, relation);
    }

    /// Fails if the relation is missing.
    pub fn check_delete_relation(&self, id: RelationId) -> Result<(), StorageError> {
        if !self.relations.contains_key(&id) {
            return Err(StorageError::RelationNotFound(id));
        }
        Ok(())
    }

    /// Removes a relation checked by [`Self::check_delete_relation`].
    pub fn apply_delete_relation(&mut self, id: RelationId) {
        let Some(relation) = self.relations.remove(&id) else {
            return;
        };
        if let Some(set) = self.by_target.get_mut(&relation.target) {
            set.remove(&id);
            if set.is_empty() {
                self.by_target.remove(&relation.target);
            }
        }
    }

    // --- merge ---

    /// Resolves a checked plan against the current state.
    ///
    /// # Errors
    /// `NotFound` for the first id, keeper first, that does not exist.
    pub fn plan_merge(&self, plan: &MergePlan, at: DateTime<Utc>) -> Result<MergeChange, MergeError> {
        if let Some(id) = plan.all_ids().find(|id| !self.entities.contains_key(id)) {
            return Err(MergeError::NotFound { id });
        }
        let reassigned = plan
            .remove_ids()
            .iter()
            .filter_map(|id| self.by_target.get(id))
            .flatten()
            .copied()
            .collect();
        Ok(MergeChange {
            keep_id: plan.keep_id(),
            remove_ids: plan.remove_ids().to_vec(),
            reassigned,
            at,
        })
    }

    /// Checks that a recorded merge still applies cleanly. Used on replay.
    pub fn check_merge(&self, change: &MergeChange) -> Result<(), StorageError> {
        if change.remove_ids.contains(&change.keep_id) {
            return Err(StorageError::BackendError(format!(
                "merge keeps and removes the same entity: {}",
                change.keep_id
            )));
        }
        for id in std::iter::once(&change.keep_id).chain(&change.remove_ids) {
            if !self.entities.contains_key(id) {
                return Err(StorageError::EntityNotFound(*id));
            }
        }
        for id in &change.reassigned {
            let relation = self
                .relations
                .get(id)
                .ok_or(StorageError::RelationNotFound(*id))?;
            if !change.remove_ids.contains(&relation.target) {
                return Err(StorageError::BackendError(format!(
                    "relation {id} does not target a removed entity"
                )));
            }
        }
        let moving: usize = change
            .remove_ids
            .iter()
            .map(|id| self.reference_count(*id))
            .sum();
        if moving != change.reassigned.len() {
            return Err(StorageError::BackendError(format!(
                "merge records {} reassigned relations but {moving} target removed entities",
                change.reassigned.len()
            )));
        }
        Ok(())
    }

    /// Retargets relations to the keeper, then deletes the removed entities.
    pub fn apply_merge(&mut self, change: &MergeChange) -> MergeResult {
        let mut reassigned_relation_count = 0;
        for id in &change.reassigned {
            if let Some(relation) = self.relations.get_mut(id) {
                relation.retarget(change.keep_id, change.at);
                self.by_target
                    .entry(change.keep_id)
                    .or_default()
                    .insert(*id);
                reassigned_relation_count += 1;
            }
        }

        let mut deleted_count = 0;
        for id in &change.remove_ids {
            if self.entities.contains_key(id) {
                self.apply_delete(*id);
                deleted_count += 1;
            }
        }

        MergeResult {
            deleted_count,
            reassigned_relation_count,
        }
    }
}
