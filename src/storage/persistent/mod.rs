//! Persistent storage backend for dedupkit.
//!
//! This module provides durable, crash-safe storage with:
//! - Write-Ahead Logging (WAL) for crash recovery
//! - File locking for single-process concurrency
//! - CRC32 checksums for corruption detection
//! - Snapshot compaction to bound replay time
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      PersistentStore                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │                 RwLock<DirectoryIndex>                        │
//! │  ┌─────────────────┐  ┌─────────────────┐                    │
//! │  │ WriteAheadLog   │  │ Snapshot        │                    │
//! │  │ (append-only)   │  │ (compacted)     │                    │
//! │  └────────┬────────┘  └────────┬────────┘                    │
//! │           └──────────┬─────────┘                             │
//! │                      ↓                                       │
//! │           ┌─────────────────────┐                            │
//! │           │    DirectoryLock    │                            │
//! │           └─────────────────────┘                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod codec;
mod dir_lock;
mod snapshot;
mod stores;
mod wal;

pub use dir_lock::{DirectoryLock, LOCK_FILE};
pub use snapshot::SnapshotHeader;
pub use stores::{CompactionResult, PersistentStore};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use crate::error::{DedupResult, ValidationError};

/// Configuration for persistent storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistentConfig {
    /// WAL size that triggers compaction into a snapshot (bytes).
    pub max_wal_size: u64,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024, // 64 MB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    /// 4 KiB minimum to avoid degenerate compaction loops.
    pub const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Checks the configuration.
    ///
    /// # Errors
    /// `InvalidField` if `max_wal_size` is below [`Self::MIN_WAL_SIZE`].
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidField {
                field: "max_wal_size".to_string(),
                reason: format!(
                    "must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            });
        }
        Ok(self)
    }
}

/// Open or create a persistent directory store at the given path.
///
/// # Arguments
/// * `path` - Directory to store the database files
/// * `config` - Optional configuration (uses defaults if None)
///
/// # Errors
/// - If the configuration is invalid
/// - If the path cannot be created or accessed
/// - If another store holds the lock
/// - If WAL replay fails due to corruption
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use dedupkit::storage::persistent::open_database;
/// use dedupkit::DedupService;
///
/// let store = open_database("./directory.db", None)?;
/// let service = DedupService::new(Arc::new(store));
/// ```
pub fn open_database(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> DedupResult<PersistentStore> {
    let cfg = config.unwrap_or_default().validate()?;
    Ok(PersistentStore::open(path.as_ref(), cfg)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_rejects_tiny_wal() {
        let cfg = PersistentConfig {
            max_wal_size: 16,
            ..PersistentConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ValidationError::InvalidField { field, .. }) if field == "max_wal_size"
        ));
        assert!(PersistentConfig::default().validate().is_ok());
    }
}
