//! Request representation for dedupkit operations.
//!
//! Requests are explicit, versioned, serializable values. This enables:
//! - Network transport between clients and servers
//! - Validation at the boundary before anything touches storage
//! - Debugging and inspection

mod operations;
mod serialization;
mod validation;

pub use operations::{
    AutoCleanPayload, DedupRequest, FindDuplicatesPayload, MergePayload, Operation,
};

pub use serialization::{from_json, to_json_pretty};
pub use validation::{MAX_MERGE_IDS, MAX_TEXT_LEN};
