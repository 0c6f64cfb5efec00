//! # dedupkit - duplicate detection and safe merging for planning directories
//!
//! dedupkit finds guest, household and vendor records that name the same
//! thing, proposes which record to keep, and merges the rest into it in one
//! atomic step.
//!
//! ## Core Concepts
//!
//! - **Similarity**: normalized Levenshtein score in `[0, 1]`
//! - **DuplicateGroup**: entities linked by scores at or above a threshold
//! - **Keeper**: the group member that survives a merge, chosen by trust,
//!   usage and contact completeness
//! - **Merge**: reassigns every relation from removed entities to the keeper
//!   and deletes them, all or nothing
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use dedupkit::{DedupService, DetectionConfig, EntityKind, InMemoryStore, NamedEntity};
//!
//! let service = DedupService::new(Arc::new(InMemoryStore::new()));
//! service.register_entity(NamedEntity::new("Elegant Events", EntityKind::Vendor))?;
//! service.register_entity(NamedEntity::new("Elegant Events Co", EntityKind::Vendor))?;
//!
//! let report = service.duplicate_report(&EntityKind::Vendor, DetectionConfig::default())?;
//! assert_eq!(report.groups.len(), 1);
//!
//! let group = &report.groups[0];
//! let result = service.merge(group.suggested_keeper_id, &group.remove_ids())?;
//! assert_eq!(result.deleted_count, 1);
//! # Ok::<(), dedupkit::DedupError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Records
pub mod entity;
pub mod error;
pub mod usage;

// Detection, ranking, merging
pub mod detect;
pub mod merge;
pub mod rank;
pub mod similarity;

// Requests and execution
pub mod ir;
pub mod service;
pub mod storage;

#[cfg(feature = "transport-grpc")]
pub mod transport;

pub use detect::{
    find_duplicates, DetectionConfig, DuplicateDetector, DuplicateGroup, GroupId, GroupScope,
};
pub use entity::{EntityId, EntityKind, NamedEntity};
pub use error::{DedupError, DedupResult, MergeError, TransportError, ValidationError};
pub use ir::{
    AutoCleanPayload, DedupRequest, FindDuplicatesPayload, MergePayload, Operation,
};
pub use merge::{MergeExecutor, MergePlan, MergeResult};
pub use rank::{rank_group, select_keeper, RankedGroup, RankedMember};
pub use service::{AutoCleanResult, DedupResponse, DedupService, DuplicateReport, ServiceConfig};
pub use similarity::{match_key, normalize_name, similarity};
pub use storage::{DirectoryStore, EntityStore, InMemoryStore, RelationStore, StorageError};
pub use usage::{Relation, RelationId, RelationKind, Usage};
