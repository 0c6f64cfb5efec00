//! Request envelope and operation payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detect::{DetectionConfig, GroupScope};
use crate::entity::{EntityId, EntityKind};

/// The top-level wrapper for every dedupkit request.
///
/// Every operation is wrapped in this struct to provide:
/// - Protocol versioning for forward/backward compatibility
/// - Request tracking via unique IDs
/// - Timestamp for audit logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupRequest {
    /// Protocol version (e.g., "1.0").
    pub version: String,

    /// Unique identifier for this request (for tracing/debugging).
    pub request_id: Uuid,

    /// When this request was created.
    pub timestamp: DateTime<Utc>,

    /// The operation to execute.
    pub operation: Operation,
}

impl DedupRequest {
    /// Current protocol version.
    pub const CURRENT_VERSION: &'static str = "1.0";

    /// Creates a new request with the given operation.
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self {
            version: Self::CURRENT_VERSION.to_string(),
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
        }
    }

    /// Sets a custom request ID (useful for correlation).
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

/// All supported operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    /// Report duplicate groups with ranked members.
    FindDuplicates(FindDuplicatesPayload),

    /// Merge entities into a keeper.
    Merge(MergePayload),

    /// Detect, rank and merge every group in one call.
    AutoClean(AutoCleanPayload),
}

/// Payload for FIND_DUPLICATES operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindDuplicatesPayload {
    /// Which kind of entity to scan.
    pub kind: EntityKind,

    /// Match threshold; the service default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    /// Grouping scope; the service default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<GroupScope>,
}

impl FindDuplicatesPayload {
    /// Payload scanning `kind` with service defaults.
    #[must_use]
    pub const fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            threshold: None,
            scope: None,
        }
    }

    /// Overrides the match threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Overrides the grouping scope.
    #[must_use]
    pub fn with_scope(mut self, scope: GroupScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Detection config with request overrides applied to `defaults`.
    #[must_use]
    pub fn detection_config(&self, defaults: DetectionConfig) -> DetectionConfig {
        DetectionConfig {
            threshold: self.threshold.unwrap_or(defaults.threshold),
            scope: self.scope.unwrap_or(defaults.scope),
        }
    }
}

/// Payload for MERGE operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePayload {
    /// The entity that survives.
    pub keep_id: EntityId,

    /// Entities folded into the keeper and deleted.
    pub remove_ids: Vec<EntityId>,
}

/// Payload for AUTO_CLEAN operations.
///
/// Uses the same selection fields as a duplicate report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoCleanPayload {
    /// Kind, threshold and scope to clean.
    #[serde(flatten)]
    pub selection: FindDuplicatesPayload,
}

impl AutoCleanPayload {
    /// Payload cleaning `kind` with service defaults.
    #[must_use]
    pub const fn new(kind: EntityKind) -> Self {
        Self {
            selection: FindDuplicatesPayload::new(kind),
        }
    }
}
