//! Persistent store implementation.
//!
//! The store wraps:
//! - An in-memory [`DirectoryIndex`] for fast reads
//! - WAL integration for durable writes
//! - Snapshots for compaction
//!
//! Every write takes the index lock, checks the change, appends it to the
//! WAL, and only then applies it to the index.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;

use crate::entity::{EntityId, EntityKind, NamedEntity};
use crate::error::MergeError;
use crate::merge::{MergeExecutor, MergePlan, MergeResult};
use crate::storage::index::DirectoryIndex;
use crate::storage::traits::{EntityStore, RelationStore, StorageError};
use crate::usage::{Relation, RelationId, Usage};

use super::codec;
use super::dir_lock::DirectoryLock;
use super::snapshot::{self, SnapshotWriter};
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "directory.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn wal_err(e: std::io::Error) -> StorageError {
    StorageError::BackendError(format!("WAL write failed: {e}"))
}

/// Result of a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Last WAL sequence included in the snapshot.
    pub up_to_sequence: u64,
    /// Entities written to the snapshot.
    pub entities: u64,
    /// Relations written to the snapshot.
    pub relations: u64,
    /// Path of the snapshot, `None` when there was nothing to compact.
    pub snapshot_path: Option<PathBuf>,
    /// WAL size before truncation.
    pub wal_size_before: u64,
    /// WAL size after truncation.
    pub wal_size_after: u64,
}

/// Durable directory store.
///
/// Holds an exclusive lock on its directory for its whole lifetime.
pub struct PersistentStore {
    dir: PathBuf,
    /// File lock preventing concurrent access.
    _lock: DirectoryLock,
    wal: WriteAheadLog,
    state: RwLock<DirectoryIndex>,
    config: PersistentConfig,
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistentStore {
    /// Open or create a persistent directory store.
    ///
    /// Loads the latest snapshot, then replays WAL entries written after it.
    ///
    /// # Errors
    /// - `BackendError` if the directory cannot be created, is locked by
    ///   another store, or the WAL does not replay cleanly
    /// - `SerializationError` if the snapshot cannot be decoded
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| {
            StorageError::BackendError(format!("failed to create database directory: {e}"))
        })?;

        let lock = DirectoryLock::acquire(dir)
            .map_err(|e| StorageError::BackendError(format!("failed to acquire lock: {e}")))?;

        let (base_sequence, index) = match snapshot::load(dir) {
            Ok(Some((header, index))) => (header.up_to_sequence, index),
            Ok(None) => (0, DirectoryIndex::default()),
            Err(e) => {
                return Err(StorageError::SerializationError(format!(
                    "failed to load snapshot: {e}"
                )))
            }
        };

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write, base_sequence)
            .map_err(|e| StorageError::BackendError(format!("failed to open WAL: {e}")))?;

        let store = Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            state: RwLock::new(index),
            config,
        };
        store.replay_wal(base_sequence)?;
        Ok(store)
    }

    /// The database directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn replay_wal(&self, base_sequence: u64) -> Result<(), StorageError> {
        let iter = self
            .wal
            .iter()
            .map_err(|e| StorageError::BackendError(format!("failed to iterate WAL: {e}")))?;
        let mut state = self.state.write().map_err(|_| lock_err("wal.replay"))?;

        let mut count = 0u64;
        for entry_result in iter {
            let entry = entry_result
                .map_err(|e| StorageError::BackendError(format!("corrupted WAL entry: {e}")))?;
            if entry.sequence <= base_sequence {
                continue;
            }
            apply_entry(&mut state, entry.kind).map_err(|e| {
                StorageError::BackendError(format!(
                    "failed to apply WAL entry {}: {e}",
                    entry.sequence
                ))
            })?;
            count += 1;
        }

        if count > 0 {
            tracing::info!(
                dir = %self.dir.display(),
                replayed = count,
                entities = state.entity_count(),
                relations = state.relation_count(),
                "replayed WAL"
            );
        }
        Ok(())
    }

    /// Write a snapshot of the current state and truncate the WAL.
    ///
    /// This is safe to call at any time - if it fails partway through,
    /// the WAL still contains all data and will be replayed on next open.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        // Holding the write lock keeps writers out while the snapshot is cut.
        let state = self.state.write().map_err(|_| lock_err("compact"))?;
        self.compact_locked(&state)
    }

    fn compact_locked(&self, state: &DirectoryIndex) -> Result<CompactionResult, StorageError> {
        let io = |context: &str, e: std::io::Error| {
            StorageError::BackendError(format!("compaction failed to {context}: {e}"))
        };

        let wal_size_before = self.wal.size_bytes().map_err(|e| io("stat WAL", e))?;
        let up_to_sequence = self.wal.current_sequence().map_err(|e| io("read sequence", e))?;
        if wal_size_before <= codec::HEADER_LEN {
            return Ok(CompactionResult {
                up_to_sequence,
                entities: state.entity_count() as u64,
                relations: state.relation_count() as u64,
                snapshot_path: None,
                wal_size_before,
                wal_size_after: wal_size_before,
            });
        }

        let header = SnapshotWriter::new(&self.dir)
            .and_then(|writer| writer.commit(state, up_to_sequence))
            .map_err(|e| io("write snapshot", e))?;

        self.wal
            .append(WalEntryKind::Checkpoint { up_to_sequence })
            .map_err(|e| io("write checkpoint", e))?;
        self.wal.truncate().map_err(|e| io("truncate WAL", e))?;

        let wal_size_after = self.wal.size_bytes().map_err(|e| io("stat WAL", e))?;
        tracing::info!(
            dir = %self.dir.display(),
            up_to_sequence,
            entities = header.entity_count,
            relations = header.relation_count,
            wal_size_before,
            wal_size_after,
            "compacted WAL into snapshot"
        );

        Ok(CompactionResult {
            up_to_sequence,
            entities: header.entity_count,
            relations: header.relation_count,
            snapshot_path: Some(snapshot::snapshot_path(&self.dir)),
            wal_size_before,
            wal_size_after,
        })
    }

    /// Compacts once the WAL outgrows `max_wal_size`. The triggering write is
    /// already durable, so a failure here is only logged.
    fn maybe_compact(&self, state: &DirectoryIndex) {
        match self.wal.size_bytes() {
            Ok(size) if size > self.config.max_wal_size => {
                if let Err(e) = self.compact_locked(state) {
                    tracing::warn!(error = %e, "automatic compaction failed");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to stat WAL"),
        }
    }

    /// Get the current WAL size in bytes.
    pub fn wal_size(&self) -> u64 {
        self.wal.size_bytes().unwrap_or(0)
    }
}

fn apply_entry(state: &mut DirectoryIndex, kind: WalEntryKind) -> Result<(), StorageError> {
    match kind {
        WalEntryKind::EntityInsert(entity) => {
            state.check_insert(&entity)?;
            state.apply_insert(entity);
        }
        WalEntryKind::EntityUpdate(entity) => {
            state.check_update(&entity)?;
            state.apply_update(entity);
        }
        WalEntryKind::EntityDelete { id } => {
            state.check_delete(id)?;
            state.apply_delete(id);
        }
        WalEntryKind::RelationInsert(relation) => {
            state.check_insert_relation(&relation)?;
            state.apply_insert_relation(relation);
        }
        WalEntryKind::RelationDelete { id } => {
            state.check_delete_relation(id)?;
            state.apply_delete_relation(id);
        }
        WalEntryKind::Merge(change) => {
            state.check_merge(&change)?;
            state.apply_merge(&change);
        }
        WalEntryKind::Checkpoint { .. } => {
            // Checkpoint markers are informational during replay
        }
    }
    Ok(())
}

impl EntityStore for PersistentStore {
    fn insert(&self, entity: NamedEntity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.insert"))?;
        state.check_insert(&entity)?;
        self.wal
            .append(WalEntryKind::EntityInsert(entity.clone()))
            .map_err(wal_err)?;
        state.apply_insert(entity);
        self.maybe_compact(&state);
        Ok(())
    }

    fn get(&self, id: EntityId) -> Result<Option<NamedEntity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.get"))?;
        Ok(state.get(id).cloned())
    }

    fn update(&self, entity: NamedEntity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.update"))?;
        state.check_update(&entity)?;
        self.wal
            .append(WalEntryKind::EntityUpdate(entity.clone()))
            .map_err(wal_err)?;
        state.apply_update(entity);
        self.maybe_compact(&state);
        Ok(())
    }

    fn delete(&self, id: EntityId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.delete"))?;
        state.check_delete(id)?;
        self.wal
            .append(WalEntryKind::EntityDelete { id })
            .map_err(wal_err)?;
        state.apply_delete(id);
        self.maybe_compact(&state);
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

impl RelationStore for PersistentStore {
    fn insert_relation(&self, relation: Relation) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("relation.insert"))?;
        state.check_insert_relation(&relation)?;
        self.wal
            .append(WalEntryKind::RelationInsert(relation.clone()))
            .map_err(wal_err)?;
        state.apply_insert_relation(relation);
        self.maybe_compact(&state);
        Ok(())
    }

    fn get_relation(&self, id: RelationId) -> Result<Option<Relation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relation.get"))?;
        Ok(state.get_relation(id).cloned())
    }

    fn delete_relation(&self, id: RelationId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("relation.delete"))?;
        state.check_delete_relation(id)?;
        self.wal
            .append(WalEntryKind::RelationDelete { id })
            .map_err(wal_err)?;
        state.apply_delete_relation(id);
        self.maybe_compact(&state);
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

impl MergeExecutor for PersistentStore {
    fn merge(&self, keep_id: EntityId, remove_ids: &[EntityId]) -> Result<MergeResult, MergeError> {
        let plan = MergePlan::new(keep_id, remove_ids)?;
        let mut state = self
            .state
            .write()
            .map_err(|_| MergeError::transaction("poisoned lock: entity.merge"))?;
        let change = state.plan_merge(&plan, Utc::now())?;

        // One WAL entry for the whole merge. If it is not written, nothing
        // has been applied.
        self.wal
            .append(WalEntryKind::Merge(change.clone()))
            .map_err(|e| MergeError::transaction(format!("WAL write failed: {e}")))?;
        let result = state.apply_merge(&change);
        self.maybe_compact(&state);

        tracing::debug!(
            keep_id = %keep_id,
            deleted = result.deleted_count,
            reassigned = result.reassigned_relation_count,
            "merge committed"
        );
        Ok(result)
    }
}
