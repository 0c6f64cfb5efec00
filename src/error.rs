//! Error types for dedupkit.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions (a merge conflict is not a missing record is not a
//! failed transaction).

use thiserror::Error;

use crate::entity::EntityId;
use crate::storage::StorageError;

/// Validation errors that occur during input validation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Name is empty or whitespace.
    #[error("Entity name cannot be empty")]
    EmptyEntityName,

    /// A required field is absent or empty.
    #[error("Required field '{field}' is missing")]
    MissingField {
        /// Name of the field.
        field: String,
    },

    /// A field is longer than allowed.
    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        /// Name of the field.
        field: String,
        /// Longest accepted length.
        max_length: usize,
    },

    /// A field has a value that cannot be accepted.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Threshold outside `[0.0, 1.0]` or NaN.
    #[error("Similarity threshold {value} is out of range [0.0, 1.0]")]
    ThresholdOutOfRange {
        /// The rejected value.
        value: f64,
    },

    /// Request envelope version is not supported.
    #[error("Unsupported protocol version '{actual}' (expected {expected})")]
    UnsupportedVersion {
        /// Version the request carried.
        actual: String,
        /// Version this build accepts.
        expected: String,
    },
}

/// Merge errors.
///
/// Every variant implies that no state was changed, so a failed merge is safe
/// to retry once the cause is addressed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// The keeper is also listed for removal.
    #[error("Merge conflict: keep id {keep_id} also appears in remove ids")]
    Conflict {
        /// The keeper id that was also listed for removal.
        keep_id: EntityId,
    },

    /// The keeper or a removed id does not exist.
    #[error("Entity not found: {id}")]
    NotFound {
        /// The first missing id.
        id: EntityId,
    },

    /// No ids to remove.
    #[error("Merge requires at least one id to remove")]
    EmptyRemoveSet,

    /// Applying the merge failed; nothing was changed.
    #[error("Merge transaction failed and was rolled back: {message}")]
    Transaction {
        /// What went wrong.
        message: String,
    },
}

impl MergeError {
    /// Creates a transaction error.
    #[must_use]
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }
}

/// Transport errors for client-server communication.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the server.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Underlying cause.
        message: String,
    },

    /// Encoding a request failed.
    #[error("Failed to serialize request: {message}")]
    SerializationFailed {
        /// Underlying cause.
        message: String,
    },

    /// Decoding a payload failed.
    #[error("Failed to deserialize response: {message}")]
    DeserializationFailed {
        /// Underlying cause.
        message: String,
    },

    /// The server answered with an error status.
    #[error("Server error (code {code}): {message}")]
    ServerError {
        /// Status code from the server.
        code: u32,
        /// Status message from the server.
        message: String,
    },
}

/// Top-level error type for dedupkit.
#[derive(Debug, Error)]
pub enum DedupError {
    /// Input failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A merge was refused or failed.
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// A storage backend failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Client-server communication failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invariant violation inside dedupkit.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl DedupError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a merge error.
    #[must_use]
    pub const fn is_merge(&self) -> bool {
        matches!(self, Self::Merge(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this error reports a missing record.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Merge(MergeError::NotFound { .. })
                | Self::Storage(StorageError::EntityNotFound(_) | StorageError::RelationNotFound(_))
        )
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false, // Validation errors won't change on retry
            Self::Merge(e) => matches!(e, MergeError::Transaction { .. }),
            Self::Storage(e) => matches!(e, StorageError::ConnectionError(_)),
            Self::Transport(e) => match e {
                TransportError::ConnectionFailed { .. } => true,
                TransportError::ServerError { code, .. } => *code >= 500,
                _ => false,
            },
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for dedupkit operations.
pub type DedupResult<T> = Result<T, DedupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_threshold() {
        let err = ValidationError::ThresholdOutOfRange { value: 1.5 };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_merge_error_conflict_names_keep_id() {
        let id = EntityId::new();
        let err = MergeError::Conflict { keep_id: id };
        let msg = format!("{err}");
        assert!(msg.contains("conflict"));
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn test_merge_error_not_found() {
        let id = EntityId::new();
        let err: DedupError = MergeError::NotFound { id }.into();
        assert!(err.is_merge());
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transaction_error_is_retryable() {
        let err: DedupError = MergeError::transaction("disk full").into();
        assert!(err.is_retryable());
        assert!(format!("{err}").contains("rolled back"));
    }

    #[test]
    fn test_transport_error() {
        let err = TransportError::ConnectionFailed {
            message: "refused".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("Connection failed"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn test_dedup_error_from_validation() {
        let err: DedupError = ValidationError::EmptyEntityName.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_dedup_error_from_storage() {
        let err: DedupError = StorageError::EntityNotFound(EntityId::new()).into();
        assert!(err.is_storage());
        assert!(err.is_not_found());
    }

    #[test]
    fn test_dedup_error_internal() {
        let err = DedupError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("unexpected state"));
    }

    #[test]
    fn test_dedup_error_retryable() {
        let err: DedupError = TransportError::ServerError {
            code: 503,
            message: "busy".to_string(),
        }
        .into();
        assert!(err.is_transport());
        assert!(err.is_retryable());

        let err: DedupError = TransportError::ServerError {
            code: 400,
            message: "bad".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
    }
}
