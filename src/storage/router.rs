use super::coordinator::ReplicationCoordinator;
use super::partitioner::HashRing;
use super::types::{DeleteOutcome, KvError, ReplicationError, WriteAck};
use crate::membership::types::NodeIdentity;
use crate::peer::client::PeerClient;
use crate::peer::protocol::{KeyValue, MessageType, WireMessage};
use std::sync::Arc;

/// Entry point for client operations.
///
/// Every node decides on its own whether it is the primary for a key, from one ring
/// snapshot per operation that also supplies the replica set. If it is, the
/// operation runs here; if not, it is sent to the primary over a single connection and
/// the primary's answer is returned unchanged. Forwarding is never retried.
pub struct RequestRouter {
    coordinator: Arc<ReplicationCoordinator>,
    ring: Arc<HashRing>,
    forwarder: PeerClient,
    peer_port_offset: u16,
}

impl RequestRouter {
    pub fn new(
        coordinator: Arc<ReplicationCoordinator>,
        ring: Arc<HashRing>,
        forwarder: PeerClient,
        peer_port_offset: u16,
    ) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            ring,
            forwarder,
            peer_port_offset,
        })
    }

    pub fn local(&self) -> &NodeIdentity {
        self.coordinator.local()
    }

    pub async fn apply_put(&self, key: &str, value: &str) -> Result<WriteAck, KvError> {
        let ring = self.ring.snapshot();
        let primary = ring.primary_for(key)?;
        if &primary == self.local() {
            return Ok(self.coordinator.coordinate_write_on(&ring, key, value).await?);
        }

        let body = KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let message = WireMessage::json(MessageType::ForwardPut, &body).map_err(|e| {
            ReplicationError::Encoding {
                message: e.to_string(),
            }
        })?;

        let reply = self.forward(&primary, &message).await?;
        match reply.kind {
            MessageType::OperationSuccess => decode_ack(&primary, &reply),
            MessageType::Error => Err(remote_error(&primary, &reply)),
            kind => Err(KvError::UnexpectedResponse {
                peer: primary.to_string(),
                kind,
            }),
        }
    }

    pub async fn apply_get(&self, key: &str) -> Result<Option<String>, KvError> {
        let primary = self.ring.snapshot().primary_for(key)?;
        if &primary == self.local() {
            return Ok(self.coordinator.store().get(key));
        }

        let message = WireMessage::new(MessageType::ForwardGet, key.to_string());
        let reply = self.forward(&primary, &message).await?;
        match reply.kind {
            MessageType::ValueResponse => {
                let kv: KeyValue = reply.payload_json().map_err(|e| KvError::Remote {
                    peer: primary.to_string(),
                    message: format!("malformed value response: {}", e),
                })?;
                Ok(Some(kv.value))
            }
            MessageType::KeyNotFound => Ok(None),
            MessageType::Error => Err(remote_error(&primary, &reply)),
            kind => Err(KvError::UnexpectedResponse {
                peer: primary.to_string(),
                kind,
            }),
        }
    }

    pub async fn apply_delete(&self, key: &str) -> Result<DeleteOutcome, KvError> {
        let ring = self.ring.snapshot();
        let primary = ring.primary_for(key)?;
        if &primary == self.local() {
            return Ok(self.coordinator.coordinate_delete_on(&ring, key).await?);
        }

        let message = WireMessage::new(MessageType::ForwardDelete, key.to_string());
        let reply = self.forward(&primary, &message).await?;
        match reply.kind {
            MessageType::OperationSuccess => decode_ack(&primary, &reply).map(DeleteOutcome::Deleted),
            MessageType::KeyNotFound => Ok(DeleteOutcome::NotFound),
            MessageType::Error => Err(remote_error(&primary, &reply)),
            kind => Err(KvError::UnexpectedResponse {
                peer: primary.to_string(),
                kind,
            }),
        }
    }

    async fn forward(&self, primary: &NodeIdentity, message: &WireMessage) -> Result<WireMessage, KvError> {
        let addr = primary.peer_addr(self.peer_port_offset)?;
        tracing::info!("Forwarding {:?} to primary {} ({})", message.kind, primary, addr);
        Ok(self.forwarder.request(&addr, message).await?)
    }
}

fn decode_ack(primary: &NodeIdentity, reply: &WireMessage) -> Result<WriteAck, KvError> {
    reply.payload_json().map_err(|e| KvError::Remote {
        peer: primary.to_string(),
        message: format!("malformed acknowledgment: {}", e),
    })
}

/// ERROR frames carry a serialized [`ReplicationError`] when the primary's failure was a
/// replication outcome; anything else is passed through as text.
fn remote_error(primary: &NodeIdentity, reply: &WireMessage) -> KvError {
    match reply.payload_json::<ReplicationError>() {
        Ok(err) => KvError::Replication(err),
        Err(_) => KvError::Remote {
            peer: primary.to_string(),
            message: String::from_utf8_lossy(&reply.payload).into_owned(),
        },
    }
}
