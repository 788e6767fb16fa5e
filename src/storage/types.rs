use crate::membership::types::InvalidIdentity;
use crate::peer::client::PeerError;
use crate::peer::protocol::MessageType;
use crate::storage::partitioner::RingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Acknowledgment for an accepted write or delete.
///
/// `acks` counts replica-set members (the primary included) that applied the operation
/// before the coordinator returned; late acks are not reflected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    pub key: String,
    pub acks: usize,
    pub replicas: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(WriteAck),
    NotFound,
}

/// Why a quorum wait ended without enough acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuorumFailure {
    /// Every replica answered (or failed) and too few acked.
    ReplicaFailures,
    /// The overall deadline passed with replicas still outstanding.
    Timeout,
}

impl fmt::Display for QuorumFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuorumFailure::ReplicaFailures => f.write_str("replica failures"),
            QuorumFailure::Timeout => f.write_str("timed out"),
        }
    }
}

/// Replication outcomes that are not successes.
///
/// Serializable because the primary ships them back inside an ERROR frame, letting a
/// forwarding node hand its caller exactly what the primary decided.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ReplicationError {
    #[error("no nodes available")]
    NoNodesAvailable,

    #[error("insufficient nodes for quorum: need {needed}, ring has {available}")]
    InsufficientNodes { needed: usize, available: usize },

    /// This node's ring names another primary for the key. Nothing was applied.
    #[error("not the primary for this key; ring names {primary}")]
    NotPrimary { primary: String },

    /// The local apply is kept even though the operation failed.
    #[error("quorum not met ({cause}): {acks} of {needed} acks")]
    QuorumNotMet {
        acks: usize,
        needed: usize,
        cause: QuorumFailure,
    },

    #[error("failed to encode replication payload: {message}")]
    Encoding { message: String },
}

impl From<RingError> for ReplicationError {
    fn from(err: RingError) -> Self {
        match err {
            RingError::NoNodesAvailable => ReplicationError::NoNodesAvailable,
        }
    }
}

/// Everything a core operation can fail with.
#[derive(Debug, Error)]
pub enum KvError {
    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    InvalidIdentity(#[from] InvalidIdentity),

    #[error("primary {peer} failed: {message}")]
    Remote { peer: String, message: String },

    #[error("unexpected {kind:?} response from {peer}")]
    UnexpectedResponse { peer: String, kind: MessageType },
}

impl From<RingError> for KvError {
    fn from(err: RingError) -> Self {
        KvError::Replication(err.into())
    }
}
