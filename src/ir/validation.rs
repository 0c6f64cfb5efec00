//! Request validation.
//!
//! This module performs validation on deserialized requests. Typed
//! constructors already produce well-formed payloads, but validation is
//! required to defend server/embedded execution against malformed or
//! adversarial JSON.

use crate::detect::DetectionConfig;
use crate::entity::EntityKind;
use crate::error::ValidationError;
use crate::ir::operations::{
    AutoCleanPayload, DedupRequest, FindDuplicatesPayload, MergePayload, Operation,
};

/// Upper bound on ids in a single merge.
pub const MAX_MERGE_IDS: usize = 1024;

/// Conservative upper bound for free-form text fields.
pub const MAX_TEXT_LEN: usize = 256;

fn validate_kind(kind: &EntityKind) -> Result<(), ValidationError> {
    if let EntityKind::Custom(name) = kind {
        let v = name.trim();
        if v.is_empty() {
            return Err(ValidationError::MissingField {
                field: "kind".to_string(),
            });
        }
        if v.len() > MAX_TEXT_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "kind".to_string(),
                max_length: MAX_TEXT_LEN,
            });
        }
    }
    Ok(())
}

fn validate_threshold(threshold: Option<f64>) -> Result<(), ValidationError> {
    if let Some(value) = threshold {
        DetectionConfig::with_threshold(value).validate()?;
    }
    Ok(())
}

impl FindDuplicatesPayload {
    /// Validates this payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_kind(&self.kind)?;
        validate_threshold(self.threshold)?;
        Ok(())
    }
}

impl MergePayload {
    /// Validates this payload.
    ///
    /// Conflicts between `keep_id` and `remove_ids` are reported by the merge
    /// itself so callers see the same error from every entry point.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.keep_id.is_nil() {
            return Err(ValidationError::InvalidField {
                field: "keep_id".to_string(),
                reason: "must not be the nil UUID".to_string(),
            });
        }
        if self.remove_ids.is_empty() {
            return Err(ValidationError::MissingField {
                field: "remove_ids".to_string(),
            });
        }
        if self.remove_ids.len() > MAX_MERGE_IDS {
            return Err(ValidationError::FieldTooLong {
                field: "remove_ids".to_string(),
                max_length: MAX_MERGE_IDS,
            });
        }
        Ok(())
    }
}

impl AutoCleanPayload {
    /// Validates this payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.selection.validate()
    }
}

impl Operation {
    /// Validate the operation payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::FindDuplicates(p) => p.validate(),
            Self::Merge(p) => p.validate(),
            Self::AutoClean(p) => p.validate(),
        }
    }
}

impl DedupRequest {
    /// Validates the protocol version and the operation payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version != Self::CURRENT_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                actual: self.version.clone(),
                expected: Self::CURRENT_VERSION.to_string(),
            });
        }
        self.operation.validate()
    }
}
