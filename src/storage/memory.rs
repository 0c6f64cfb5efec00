//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::sync::RwLock;

use chrono::Utc;

use crate::entity::{EntityId, EntityKind, NamedEntity};
use crate::error::MergeError;
use crate::merge::{MergeExecutor, MergePlan, MergeResult};
use crate::storage::index::DirectoryIndex;
use crate::storage::traits::{EntityStore, RelationStore, StorageError};
use crate::usage::{Relation, RelationId, Usage};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory directory store.
///
/// One lock guards entities and relations together, so a merge observes and
/// changes both atomically.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<DirectoryIndex>,
}

impl InMemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for InMemoryStore {
    fn insert(&self, entity: NamedEntity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.insert"))?;
        state.check_insert(&entity)?;
        state.apply_insert(entity);
        Ok(())
    }

    fn get(&self, id: EntityId) -> Result<Option<NamedEntity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.get"))?;
        Ok(state.get(id).cloned())
    }

    fn update(&self, entity: NamedEntity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.update"))?;
        state.check_update(&entity)?;
        state.apply_update(entity);
        Ok(())
    }

    fn delete(&self, id: EntityId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.delete"))?;
        state.check_delete(id)?;
        state.apply_delete(id);
        Ok(())
    }

    fn list(&self, kind: Option<&EntityKind>) -> Result<Vec<NamedEntity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.list"))?;
        Ok(state.list(kind))
    }

    fn find_by_name(&self, name: &str) -> Result<Vec<NamedEntity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.find_by_name"))?;
        Ok(state.find_by_name(name))
    }
}

impl RelationStore for InMemoryStore {
    fn insert_relation(&self, relation: Relation) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("relation.insert"))?;
        state.check_insert_relation(&relation)?;
        state.apply_insert_relation(relation);
        Ok(())
    }

    fn get_relation(&self, id: RelationId) -> Result<Option<Relation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relation.get"))?;
        Ok(state.get_relation(id).cloned())
    }

    fn delete_relation(&self, id: RelationId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("relation.delete"))?;
        state.check_delete_relation(id)?;
        state.apply_delete_relation(id);
        Ok(())
    }

    fn relations_for(&self, target: EntityId) -> Result<Vec<Relation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relation.relations_for"))?;
        Ok(state.relations_for(target))
    }

    fn usage_for(&self, target: EntityId) -> Result<Usage, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relation.usage_for"))?;
        Ok(state.usage_for(target))
    }
}

impl MergeExecutor for InMemoryStore {
    fn merge(&self, keep_id: EntityId, remove_ids: &[EntityId]) -> Result<MergeResult, MergeError> {
        let plan = MergePlan::new(keep_id, remove_ids)?;
        let mut state = self
            .state
            .write()
            .map_err(|_| MergeError::transaction("poisoned lock: entity.merge"))?;
        let change = state.plan_merge(&plan, Utc::now())?;
        let result = state.apply_merge(&change);
        tracing::debug!(
            keep_id = %keep_id,
            deleted = result.deleted_count,
            reassigned = result.reassigned_relation_count,
            "merge applied"
        );
        Ok(result)
    }
}
