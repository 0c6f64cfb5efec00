//! Request serialization helpers.
//!
//! Serde already provides JSON serialization. This module centralizes
//! convenience helpers used by clients/servers and keeps formatting stable.

use crate::error::{DedupError, TransportError};
use crate::ir::operations::DedupRequest;

/// Serialize a request to pretty JSON.
pub fn to_json_pretty(request: &DedupRequest) -> Result<String, DedupError> {
    serde_json::to_string_pretty(request).map_err(|e| {
        TransportError::SerializationFailed {
            message: format!("serialize request: {e}"),
        }
        .into()
    })
}

/// Deserialize a request from JSON.
///
/// Callers should then invoke `request.validate()` before executing.
pub fn from_json(s: &str) -> Result<DedupRequest, DedupError> {
    serde_json::from_str::<DedupRequest>(s).map_err(|e| {
        TransportError::DeserializationFailed {
            message: format!("deserialize request: {e}"),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use crate::ir::operations::{MergePayload, Operation};

    #[test]
    fn json_roundtrip_works() {
        let req = DedupRequest::new(Operation::Merge(MergePayload {
            keep_id: EntityId::new(),
            remove_ids: vec![EntityId::new()],
        }));

        let json = to_json_pretty(&req).unwrap();
        let decoded = from_json(&json).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn malformed_json_is_a_transport_error() {
        let err = from_json("{\"version\": 1}").unwrap_err();
        assert!(err.is_transport());
    }
}
