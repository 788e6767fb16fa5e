//! Client API Protocol
//!
//! Endpoints and JSON bodies for the client-facing HTTP adapter. Inter-node traffic
//! does not use these; it travels over the binary peer protocol in [`crate::peer`].

use serde::{Deserialize, Serialize};

/// Public endpoint for client write requests.
pub const ENDPOINT_PUT: &str = "/put";
/// Public endpoint for client read requests (`/get/:key`).
pub const ENDPOINT_GET: &str = "/get";
/// Public endpoint for client deletes (`/delete/:key`).
pub const ENDPOINT_DELETE: &str = "/delete";

/// Body of `POST /put`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PutRequest {
    pub key: String,
    pub value: String,
}

/// Response body shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvResponse {
    /// `Success`, `NotFound` or `Failed`.
    pub status: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Replica acknowledgments gathered before the write returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KvResponse {
    pub fn success(key: impl Into<String>) -> Self {
        Self {
            status: "Success".to_string(),
            key: key.into(),
            value: None,
            acks: None,
            error: None,
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self {
            status: "NotFound".to_string(),
            ..Self::success(key)
        }
    }

    pub fn failed(key: impl Into<String>, error: impl ToString) -> Self {
        Self {
            status: "Failed".to_string(),
            error: Some(error.to_string()),
            ..Self::success(key)
        }
    }
}
