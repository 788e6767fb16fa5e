use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{delete, get, post},
};
use std::sync::Arc;

use super::protocol::{ENDPOINT_DELETE, ENDPOINT_GET, ENDPOINT_PUT, KvResponse, PutRequest};
use super::router::RequestRouter;
use super::types::{DeleteOutcome, KvError, QuorumFailure, ReplicationError};

/// HTTP routes for one node, bound to its request router.
pub fn routes(router: Arc<RequestRouter>) -> Router {
    Router::new()
        .route(ENDPOINT_PUT, post(handle_put))
        .route(&format!("{}/:key", ENDPOINT_GET), get(handle_get))
        .route(&format!("{}/:key", ENDPOINT_DELETE), delete(handle_delete))
        .layer(Extension(router))
}

pub async fn handle_put(
    Extension(router): Extension<Arc<RequestRouter>>,
    Json(req): Json<PutRequest>,
) -> (StatusCode, Json<KvResponse>) {
    tracing::info!("PUT request for key {}", req.key);

    let result = router.apply_put(&req.key, &req.value).await;
    match result {
        Ok(ack) => {
            let mut body = KvResponse::success(ack.key);
            body.acks = Some(ack.acks);
            (StatusCode::OK, Json(body))
        }
        Err(e) => {
            tracing::error!("PUT {} failed: {}", req.key, e);
            (error_status(&e), Json(KvResponse::failed(req.key, e)))
        }
    }
}

pub async fn handle_get(
    Extension(router): Extension<Arc<RequestRouter>>,
    Path(key): Path<String>,
) -> (StatusCode, Json<KvResponse>) {
    let result = router.apply_get(&key).await;
    match result {
        Ok(Some(value)) => {
            let mut body = KvResponse::success(key);
            body.value = Some(value);
            (StatusCode::OK, Json(body))
        }
        Ok(None) => (StatusCode::NOT_FOUND, Json(KvResponse::not_found(key))),
        Err(e) => {
            tracing::error!("GET {} failed: {}", key, e);
            (error_status(&e), Json(KvResponse::failed(key, e)))
        }
    }
}

pub async fn handle_delete(
    Extension(router): Extension<Arc<RequestRouter>>,
    Path(key): Path<String>,
) -> (StatusCode, Json<KvResponse>) {
    tracing::info!("DELETE request for key {}", key);

    let result = router.apply_delete(&key).await;
    match result {
        Ok(DeleteOutcome::Deleted(ack)) => {
            let mut body = KvResponse::success(ack.key);
            body.acks = Some(ack.acks);
            (StatusCode::OK, Json(body))
        }
        Ok(DeleteOutcome::NotFound) => (StatusCode::NOT_FOUND, Json(KvResponse::not_found(key))),
        Err(e) => {
            tracing::error!("DELETE {} failed: {}", key, e);
            (error_status(&e), Json(KvResponse::failed(key, e)))
        }
    }
}

pub fn error_status(err: &KvError) -> StatusCode {
    match err {
        KvError::Replication(ReplicationError::NoNodesAvailable)
        | KvError::Replication(ReplicationError::InsufficientNodes { .. })
        | KvError::Replication(ReplicationError::NotPrimary { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        KvError::Replication(ReplicationError::QuorumNotMet {
            cause: QuorumFailure::Timeout,
            ..
        }) => StatusCode::GATEWAY_TIMEOUT,
        KvError::Replication(ReplicationError::QuorumNotMet { .. })
        | KvError::Replication(ReplicationError::Encoding { .. }) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        KvError::Peer(_)
        | KvError::InvalidIdentity(_)
        | KvError::Remote { .. }
        | KvError::UnexpectedResponse { .. } => StatusCode::BAD_GATEWAY,
    }
}
