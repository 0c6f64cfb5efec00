//! Storage backends for dedupkit.
//!
//! [`InMemoryStore`] keeps everything in process memory. With the
//! `persistent` feature, [`persistent::PersistentStore`] adds a write-ahead
//! log, snapshots and a directory lock. Both implement [`DirectoryStore`].

mod index;
mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use index::{DirectoryIndex, MergeChange};
pub use memory::InMemoryStore;
pub use traits::{DirectoryStore, EntityStore, RelationStore, StorageError};
