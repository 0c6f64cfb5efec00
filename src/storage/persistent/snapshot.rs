//! Directory snapshots for WAL compaction.
//!
//! A snapshot is the full [`DirectoryIndex`] as of a WAL sequence number.
//! On open, the snapshot is loaded first and only WAL entries past its
//! sequence are replayed.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [codec-encoded SnapshotHeader]
//! [codec-encoded DirectoryIndex]
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::index::DirectoryIndex;

use super::codec;

const SNAPSHOT_FILE: &str = "directory.snap";

/// Snapshot file header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Last WAL sequence reflected in this snapshot.
    pub up_to_sequence: u64,
    /// Entities in the snapshot.
    pub entity_count: u64,
    /// Relations in the snapshot.
    pub relation_count: u64,
    /// When the snapshot was written.
    pub created_at: DateTime<Utc>,
}

/// Path of the snapshot inside a database directory.
#[must_use]
pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

/// Loads the snapshot in `dir`, if one exists.
///
/// Leftover temp files from an interrupted write are removed.
pub fn load(dir: &Path) -> IoResult<Option<(SnapshotHeader, DirectoryIndex)>> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(SNAPSHOT_FILE) && n.ends_with(".tmp"));
        if is_temp {
            let _ = fs::remove_file(&path);
        }
    }

    let path = snapshot_path(dir);
    if !path.exists() {
        return Ok(None);
    }

    let mut reader = BufReader::new(File::open(&path)?);
    let _version = codec::read_header(&mut reader)?;
    let header: SnapshotHeader = codec::decode(&mut reader)?;
    let index: DirectoryIndex = codec::decode(&mut reader)?;
    Ok(Some((header, index)))
}

/// Writes a snapshot atomically.
///
/// Uses write-to-temp-then-rename pattern for crash safety.
pub struct SnapshotWriter {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl SnapshotWriter {
    /// Starts a snapshot in `dir`.
    pub fn new(dir: &Path) -> IoResult<Self> {
        let final_path = snapshot_path(dir);
        let temp_path = dir.join(format!("{SNAPSHOT_FILE}.{}.tmp", Uuid::new_v4()));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer)?;

        Ok(Self {
            temp_path: Some(temp_path),
            final_path,
            writer: Some(writer),
        })
    }

    /// Writes the index and commits the snapshot (flush, fsync, rename).
    ///
    /// This is the commit point - after this returns successfully,
    /// the snapshot is guaranteed to be durable.
    pub fn commit(mut self, index: &DirectoryIndex, up_to_sequence: u64) -> IoResult<SnapshotHeader> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "writer already consumed"))?;

        let header = SnapshotHeader {
            up_to_sequence,
            entity_count: index.entity_count() as u64,
            relation_count: index.relation_count() as u64,
            created_at: Utc::now(),
        };
        writer.write_all(&codec::encode(&header)?)?;
        writer.write_all(&codec::encode(index)?)?;

        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        let temp_path = self
            .temp_path
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "temp_path already consumed"))?;
        fs::rename(&temp_path, &self.final_path)?;

        Ok(header)
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        // Best-effort cleanup of temp file if not committed
        self.writer.take();
        if let Some(ref temp_path) = self.temp_path {
            if temp_path.exists() {
                let _ = fs::remove_file(temp_path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, NamedEntity};
    use tempfile::tempdir;

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_snapshot_commit_and_load() {
        let dir = tempdir().unwrap();

        let mut index = DirectoryIndex::default();
        let entity = NamedEntity::new("Bloom Florist", EntityKind::Vendor);
        index.apply_insert(entity.clone());

        let header = SnapshotWriter::new(dir.path())
            .unwrap()
            .commit(&index, 10)
            .unwrap();
        assert_eq!(header.up_to_sequence, 10);
        assert_eq!(header.entity_count, 1);

        let (loaded_header, loaded) = load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded_header, header);
        assert_eq!(loaded.get(entity.id), Some(&entity));
        assert_eq!(loaded.find_by_name("bloom florist").len(), 1);
    }

    #[test]
    fn test_uncommitted_snapshot_leaves_nothing() {
        let dir = tempdir().unwrap();
        {
            let _writer = SnapshotWriter::new(dir.path()).unwrap();
        }
        assert!(load(dir.path()).unwrap().is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
