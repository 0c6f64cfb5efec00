//! Abstract storage traits for dedupkit.
//!
//! These traits define the contract that storage backends must implement.
//! By using traits, we enable:
//! - In-memory backends for testing and embedded use
//! - Persistent backends for production

use thiserror::Error;

use crate::entity::{EntityId, EntityKind, NamedEntity};
use crate::merge::MergeExecutor;
use crate::usage::{Relation, RelationId, Usage};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Relation not found.
    #[error("Relation not found: {0}")]
    RelationNotFound(RelationId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The entity is still the target of relations and cannot be deleted
    /// directly. Merge it into another entity instead.
    #[error("Entity {id} is still referenced by {count} relation(s)")]
    EntityReferenced {
        /// The entity that was to be deleted.
        id: EntityId,
        /// Relations still pointing at it.
        count: usize,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Storage trait for directory entities.
///
/// # Safety Considerations
/// - All mutations should be atomic where possible
/// - Implementations should handle concurrent access safely
pub trait EntityStore: Send + Sync {
    /// Insert a new entity. Returns error if ID already exists.
    fn insert(&self, entity: NamedEntity) -> Result<(), StorageError>;

    /// Get an entity by ID.
    fn get(&self, id: EntityId) -> Result<Option<NamedEntity>, StorageError>;

    /// Update an existing entity. The version must increase.
    fn update(&self, entity: NamedEntity) -> Result<(), StorageError>;

    /// Delete an entity that nothing references.
    ///
    /// # Errors
    /// - `EntityNotFound` if the entity does not exist
    /// - `EntityReferenced` if any relation still targets it
    fn delete(&self, id: EntityId) -> Result<(), StorageError>;

    /// List entities in insertion order, optionally restricted to one kind.
    fn list(&self, kind: Option<&EntityKind>) -> Result<Vec<NamedEntity>, StorageError>;

    /// Find entities whose normalized name equals the normalized `name`.
    fn find_by_name(&self, name: &str) -> Result<Vec<NamedEntity>, StorageError>;
}

/// Storage trait for relations that reference entities.
pub trait RelationStore: Send + Sync {
    /// Insert a new relation. The target entity must exist.
    fn insert_relation(&self, relation: Relation) -> Result<(), StorageError>;

    /// Get a relation by ID.
    fn get_relation(&self, id: RelationId) -> Result<Option<Relation>, StorageError>;

    /// Delete a relation.
    fn delete_relation(&self, id: RelationId) -> Result<(), StorageError>;

    /// All relations targeting an entity, oldest first.
    fn relations_for(&self, target: EntityId) -> Result<Vec<Relation>, StorageError>;

    /// Per-kind reference counts for an entity.
    fn usage_for(&self, target: EntityId) -> Result<Usage, StorageError>;
}

/// A complete directory backend: entities, relations and atomic merges.
pub trait DirectoryStore: EntityStore + RelationStore + MergeExecutor {}

impl<T> DirectoryStore for T where T: EntityStore + RelationStore + MergeExecutor {}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_entity_store_object_safe(_: &dyn EntityStore) {}
    fn _assert_relation_store_object_safe(_: &dyn RelationStore) {}
    fn _assert_directory_store_object_safe(_: &dyn DirectoryStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::EntityNotFound(EntityId::new());
        assert!(err.to_string().contains("Entity not found"));

        let err = StorageError::BackendError("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));

        let err = StorageError::EntityReferenced {
            id: EntityId::new(),
            count: 3,
        };
        assert!(err.to_string().contains("3 relation"));
    }
}
