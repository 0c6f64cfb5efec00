//! gRPC transport layer for dedupkit.
//!
//! The protocol surface is the JSON `DedupRequest` envelope. Each RPC
//! carries the envelope as bytes and returns the JSON-serialized
//! [`DedupResponse`], tagged by `"type"`.

use std::sync::Arc;

use serde::Serialize;
use tonic::{Request, Response, Status};

use crate::error::{DedupError, MergeError, TransportError};
use crate::ir::{DedupRequest, Operation};
use crate::service::{DedupResponse, DedupService};
use crate::storage::StorageError;

/// Generated protobuf types and service stubs.
#[allow(missing_docs)]
pub mod proto {
    tonic::include_proto!("dedupkit");
}

use proto::dedup_service_server::{
    DedupService as DedupRpc, DedupServiceServer,
};

pub use proto::dedup_service_client::DedupServiceClient;

// ----------------------------------------------------------------------------
// Limits (DoS protection)
// ----------------------------------------------------------------------------

/// Maximum size of a request JSON payload.
pub const MAX_REQUEST_JSON_BYTES: usize = 1024 * 1024; // 1 MiB

/// Maximum size of a response JSON payload.
pub const MAX_RESPONSE_JSON_BYTES: usize = 4 * 1024 * 1024; // 4 MiB

/// gRPC service implementation backed by a [`DedupService`].
#[derive(Debug, Clone)]
pub struct DedupGrpcService {
    service: Arc<DedupService>,
}

impl DedupGrpcService {
    /// Wraps a service for gRPC.
    #[must_use]
    pub fn new(service: Arc<DedupService>) -> Self {
        Self { service }
    }

    /// Builds the tonic server.
    #[must_use]
    pub fn into_server(self) -> DedupServiceServer<Self> {
        DedupServiceServer::new(self)
    }

    async fn run(
        &self,
        request: Request<proto::ExecuteRequest>,
        rpc: &'static str,
        expected: fn(&Operation) -> bool,
    ) -> Result<Response<proto::ExecuteResponse>, Status> {
        let req = parse_request(&request.into_inner().request_json)?;
        if !expected(&req.operation) {
            return Err(invalid_argument(format!(
                "{rpc} request carries a different operation"
            )));
        }

        // Merges hit the store lock and possibly fsync.
        let service = Arc::clone(&self.service);
        let resp = tokio::task::spawn_blocking(move || service.execute(req))
            .await
            .map_err(|e| Status::internal(format!("request task failed: {e}")))?
            .map_err(status_from_dedup_error)?;

        let response_json = encode_json(&resp, MAX_RESPONSE_JSON_BYTES)?;
        Ok(Response::new(proto::ExecuteResponse { response_json }))
    }
}

fn invalid_argument(msg: impl Into<String>) -> Status {
    Status::invalid_argument(msg.into())
}

fn parse_request(bytes: &[u8]) -> Result<DedupRequest, Status> {
    if bytes.is_empty() {
        return Err(invalid_argument("request_json is required"));
    }
    if bytes.len() > MAX_REQUEST_JSON_BYTES {
        return Err(invalid_argument("request_json exceeds maximum size"));
    }

    serde_json::from_slice(bytes)
        .map_err(|e| invalid_argument(format!("invalid request JSON: {e}")))
}

fn encode_json<T: Serialize>(value: &T, max: usize) -> Result<Vec<u8>, Status> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| Status::internal(format!("failed to serialize response JSON: {e}")))?;
    if bytes.len() > max {
        return Err(Status::resource_exhausted("serialized JSON exceeds size limit"));
    }
    Ok(bytes)
}

fn status_from_dedup_error(err: DedupError) -> Status {
    match err {
        DedupError::Validation(v) => Status::invalid_argument(v.to_string()),
        DedupError::Merge(e) => match e {
            MergeError::NotFound { .. } => Status::not_found(e.to_string()),
            MergeError::Conflict { .. } | MergeError::EmptyRemoveSet => {
                Status::failed_precondition(e.to_string())
            }
            MergeError::Transaction { .. } => Status::aborted(e.to_string()),
        },
        DedupError::Storage(e) => match e {
            StorageError::EntityNotFound(_) | StorageError::RelationNotFound(_) => {
                Status::not_found(e.to_string())
            }
            StorageError::DuplicateKey(_) => Status::already_exists(e.to_string()),
            StorageError::EntityReferenced { .. } => Status::failed_precondition(e.to_string()),
            StorageError::ConnectionError(_) => Status::unavailable(e.to_string()),
            StorageError::BackendError(_) | StorageError::SerializationError(_) => {
                Status::internal(e.to_string())
            }
        },
        DedupError::Transport(t) => match t {
            TransportError::SerializationFailed { .. }
            | TransportError::DeserializationFailed { .. } => Status::invalid_argument(t.to_string()),
            _ => Status::unavailable(t.to_string()),
        },
        DedupError::Internal { message } => Status::internal(message),
    }
}

#[tonic::async_trait]
impl DedupRpc for DedupGrpcService {
    async fn find_duplicates(
        &self,
        request: Request<proto::ExecuteRequest>,
    ) -> Result<Response<proto::ExecuteResponse>, Status> {
        self.run(request, "FindDuplicates", |op| {
            matches!(op, Operation::FindDuplicates(_))
        })
        .await
    }

    async fn merge(
        &self,
        request: Request<proto::ExecuteRequest>,
    ) -> Result<Response<proto::ExecuteResponse>, Status> {
        self.run(request, "Merge", |op| matches!(op, Operation::Merge(_)))
            .await
    }

    async fn auto_clean(
        &self,
        request: Request<proto::ExecuteRequest>,
    ) -> Result<Response<proto::ExecuteResponse>, Status> {
        self.run(request, "AutoClean", |op| matches!(op, Operation::AutoClean(_)))
            .await
    }
}

/// Decodes a response body returned by any RPC.
pub fn decode_response(bytes: &[u8]) -> Result<DedupResponse, DedupError> {
    serde_json::from_slice(bytes).map_err(|e| {
        TransportError::DeserializationFailed {
            message: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use tonic::Code;

    use crate::entity::{EntityId, EntityKind, NamedEntity};
    use crate::ir::{AutoCleanPayload, FindDuplicatesPayload, MergePayload};
    use crate::storage::InMemoryStore;

    fn make_service() -> (DedupGrpcService, Arc<DedupService>) {
        let service = Arc::new(DedupService::new(Arc::new(InMemoryStore::new())));
        (DedupGrpcService::new(Arc::clone(&service)), service)
    }

    fn vendor(service: &DedupService, name: &str) -> EntityId {
        service
            .register_entity(NamedEntity::new(name, EntityKind::Vendor))
            .expect("register vendor")
    }

    fn body(op: Operation) -> proto::ExecuteRequest {
        proto::ExecuteRequest {
            request_json: serde_json::to_vec(&DedupRequest::new(op)).unwrap(),
        }
    }

    #[tokio::test]
    async fn find_duplicates_returns_tagged_report() {
        let (svc, service) = make_service();
        vendor(&service, "Elegant Events");
        vendor(&service, "Elegant Events Co");

        let resp = svc
            .find_duplicates(Request::new(body(Operation::FindDuplicates(
                FindDuplicatesPayload::new(EntityKind::Vendor),
            ))))
            .await
            .unwrap()
            .into_inner();

        let v: serde_json::Value = serde_json::from_slice(&resp.response_json).unwrap();
        assert_eq!(v["type"], "duplicate_report");
        assert_eq!(v["groups"].as_array().map(Vec::len), Some(1));
        assert!(v["groups"][0].get("suggested_keeper_id").is_some());
    }

    #[tokio::test]
    async fn merge_returns_counts() {
        let (svc, service) = make_service();
        let keep = vendor(&service, "A");
        let gone = vendor(&service, "B");

        let resp = svc
            .merge(Request::new(body(Operation::Merge(MergePayload {
                keep_id: keep,
                remove_ids: vec![gone],
            }))))
            .await
            .unwrap()
            .into_inner();

        let v: serde_json::Value = serde_json::from_slice(&resp.response_json).unwrap();
        assert_eq!(v["type"], "merge");
        assert_eq!(v["deleted_count"], 1);
        assert!(matches!(
            decode_response(&resp.response_json).unwrap(),
            DedupResponse::Merge(_)
        ));
    }

    #[tokio::test]
    async fn auto_clean_returns_totals() {
        let (svc, service) = make_service();
        vendor(&service, "Rustic Barn");
        vendor(&service, "Rustic  Barn");

        let resp = svc
            .auto_clean(Request::new(body(Operation::AutoClean(AutoCleanPayload::new(
                EntityKind::Vendor,
            )))))
            .await
            .unwrap()
            .into_inner();

        let v: serde_json::Value = serde_json::from_slice(&resp.response_json).unwrap();
        assert_eq!(v["type"], "auto_clean");
        assert_eq!(v["total_deleted"], 1);
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let (svc, service) = make_service();
        let keep = vendor(&service, "A");

        let conflict = svc
            .merge(Request::new(body(Operation::Merge(MergePayload {
                keep_id: keep,
                remove_ids: vec![keep],
            }))))
            .await
            .unwrap_err();
        assert_eq!(conflict.code(), Code::FailedPrecondition);

        let missing = svc
            .merge(Request::new(body(Operation::Merge(MergePayload {
                keep_id: keep,
                remove_ids: vec![EntityId::new()],
            }))))
            .await
            .unwrap_err();
        assert_eq!(missing.code(), Code::NotFound);

        let empty = svc
            .merge(Request::new(body(Operation::Merge(MergePayload {
                keep_id: keep,
                remove_ids: vec![],
            }))))
            .await
            .unwrap_err();
        assert_eq!(empty.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn rejects_mismatched_and_malformed_requests() {
        let (svc, _) = make_service();

        let wrong_rpc = svc
            .merge(Request::new(body(Operation::AutoClean(AutoCleanPayload::new(
                EntityKind::Vendor,
            )))))
            .await
            .unwrap_err();
        assert_eq!(wrong_rpc.code(), Code::InvalidArgument);

        let garbage = svc
            .find_duplicates(Request::new(proto::ExecuteRequest {
                request_json: b"not json".to_vec(),
            }))
            .await
            .unwrap_err();
        assert_eq!(garbage.code(), Code::InvalidArgument);

        let oversized = svc
            .find_duplicates(Request::new(proto::ExecuteRequest {
                request_json: vec![b' '; MAX_REQUEST_JSON_BYTES + 1],
            }))
            .await
            .unwrap_err();
        assert_eq!(oversized.code(), Code::InvalidArgument);
    }
}
