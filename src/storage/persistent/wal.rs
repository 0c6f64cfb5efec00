//! Write-Ahead Log (WAL) for crash recovery.
//!
//! The WAL provides durability by:
//! 1. Writing all mutations to an append-only log before applying them
//! 2. Using fsync to ensure data reaches disk
//! 3. Replaying the log on startup to recover state
//!
//! A merge is a single entry, so replay applies all of it or none of it.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded WalEntry]
//! [ENTRY 2: codec-encoded WalEntry]
//! ...
//! ```
//!
//! On open, anything after the last intact entry (a torn or corrupted tail)
//! is cut off before new entries are appended.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, NamedEntity};
use crate::storage::index::MergeChange;
use crate::usage::{Relation, RelationId};

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The operation being logged.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    // Entity operations
    /// New entity.
    EntityInsert(NamedEntity),
    /// Replacement entity with a higher version.
    EntityUpdate(NamedEntity),
    /// Entity removal.
    EntityDelete {
        /// Id of the removed entity.
        id: EntityId,
    },

    // Relation operations
    /// New relation.
    RelationInsert(Relation),
    /// Relation removal.
    RelationDelete {
        /// Id of the removed relation.
        id: RelationId,
    },

    /// A complete merge: retargeted relations and removed entities.
    Merge(MergeChange),

    /// Everything up to `up_to_sequence` is in the snapshot.
    Checkpoint {
        /// Last sequence number covered by the snapshot.
        up_to_sequence: u64,
    },
}

struct WalWriter {
    file: File,
    sequence: u64,
    /// Length of the file up to the last complete entry.
    len: u64,
}

/// Write-Ahead Log for crash recovery.
///
/// Thread-safe via internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal")
}

impl WriteAheadLog {
    /// Open or create a WAL file.
    ///
    /// Sequence numbers continue from the larger of `base_sequence` (the last
    /// sequence already covered by a snapshot) and the last intact entry.
    pub fn open(path: &Path, sync_on_write: bool, base_sequence: u64) -> IoResult<Self> {
        let exists = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let (last_sequence, len) = if exists && file.metadata()?.len() >= codec::HEADER_LEN {
            let (last_sequence, valid_len) = Self::scan(path)?;
            let file_len = file.metadata()?.len();
            if valid_len < file_len {
                tracing::warn!(
                    path = %path.display(),
                    dropped_bytes = file_len - valid_len,
                    last_sequence,
                    "WAL has a torn or corrupted tail; truncating to last intact entry"
                );
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            (last_sequence, valid_len)
        } else {
            // New file, write header
            let mut file = file;
            file.set_len(0)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            (0, codec::HEADER_LEN)
        };

        // Reopen for appending
        let file = OpenOptions::new().append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                file,
                sequence: last_sequence.max(base_sequence),
                len,
            }),
            sync_on_write,
        })
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, WalWriter>> {
        self.writer.lock().map_err(|_| poisoned())
    }

    /// Append an entry to the WAL.
    ///
    /// Returns the sequence number assigned to this entry. The sequence only
    /// advances once the entry is written; a failed write is cut back off the
    /// file so later entries never follow a partial one.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self.lock()?;

        let candidate = writer.sequence + 1;
        let entry = WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        };

        let encoded = codec::encode(&entry)?;

        let written = writer.file.write_all(&encoded).and_then(|()| {
            if self.sync_on_write {
                writer.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            if let Err(rollback) = writer.file.set_len(writer.len) {
                tracing::error!(error = %rollback, "failed to cut partial WAL entry");
            }
            return Err(e);
        }

        writer.sequence = candidate;
        writer.len += encoded.len() as u64;

        Ok(candidate)
    }

    /// Iterate over all entries in the WAL.
    ///
    /// Used during recovery to replay mutations.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    /// Get the WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Drop every entry, keeping the sequence counter.
    ///
    /// Only call this after the state up to [`current_sequence`] has been
    /// written to a snapshot.
    ///
    /// [`current_sequence`]: Self::current_sequence
    pub fn truncate(&self) -> IoResult<()> {
        let mut writer = self.lock()?;

        // The writer appends, so once the file is empty the header lands at
        // offset zero.
        OpenOptions::new().write(true).open(&self.path)?.set_len(0)?;
        codec::write_header(&mut writer.file)?;
        if self.sync_on_write {
            writer.file.sync_all()?;
        }
        writer.len = codec::HEADER_LEN;
        Ok(())
    }

    /// Swaps the writer's handle for a read-only or an appending one, so
    /// tests can make appends fail.
    #[cfg(test)]
    pub(crate) fn set_read_only(&self, read_only: bool) -> IoResult<()> {
        let file = if read_only {
            File::open(&self.path)?
        } else {
            OpenOptions::new().append(true).open(&self.path)?
        };
        self.lock()?.file = file;
        Ok(())
    }

    /// Returns the last intact sequence and the byte length it ends at.
    fn scan(path: &Path) -> IoResult<(u64, u64)> {
        let mut iter = WalIterator::new(path)?;
        let mut last_seq = 0;
        let mut valid_len = iter.position()?;

        while let Some(entry) = iter.next() {
            match entry {
                Ok(entry) => {
                    last_seq = entry.sequence;
                    valid_len = iter.position()?;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        after_sequence = last_seq,
                        error = %e,
                        "WAL corruption detected"
                    );
                    break;
                }
            }
        }

        // A cut-short final frame ends iteration without an error; the valid
        // length still excludes it.
        Ok((last_seq, valid_len))
    }
}

/// Iterator over WAL entries.
///
/// Stops at the first frame that is cut short.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        // Skip header
        let _version = codec::read_header(&mut reader)?;

        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }

    fn at_eof(&mut self) -> IoResult<bool> {
        Ok(self.position()? >= self.file_size)
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.at_eof() {
            Ok(true) => return None,
            Ok(false) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}
