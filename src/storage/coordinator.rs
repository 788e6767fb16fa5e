//! Quorum replication for keys this node is primary for.
//!
//! The primary applies the operation to its own store first, then sends one
//! REPLICATE_* request per other replica-set member, each on its own task. The caller
//! waits until the quorum is reached, until it can no longer be reached, or until the
//! overall deadline passes. Tasks still running at that point are left to finish on
//! their own and their answers are ignored.
//!
//! A failed quorum does not undo the local apply. A node that is not at the head of the
//! key's replica set in its own ring view refuses the operation without applying it.

use super::memory::LocalStore;
use super::partitioner::{HashRing, RingSnapshot};
use super::types::{DeleteOutcome, QuorumFailure, ReplicationError, WriteAck};
use crate::membership::types::NodeIdentity;
use crate::peer::client::PeerClient;
use crate::peer::protocol::{KeyValue, MessageType, WireMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};

/// ⌊N/2⌋ + 1
pub fn quorum_for(replication_factor: usize) -> usize {
    replication_factor / 2 + 1
}

#[derive(Debug, Clone)]
pub struct ReplicationSettings {
    pub replication_factor: usize,
    pub quorum_timeout: Duration,
    pub peer_port_offset: u16,
}

pub struct ReplicationCoordinator {
    local: NodeIdentity,
    store: LocalStore,
    ring: Arc<HashRing>,
    client: PeerClient,
    settings: ReplicationSettings,
}

impl ReplicationCoordinator {
    pub fn new(
        local: NodeIdentity,
        store: LocalStore,
        ring: Arc<HashRing>,
        client: PeerClient,
        settings: ReplicationSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            local,
            store,
            ring,
            client,
            settings,
        })
    }

    pub fn local(&self) -> &NodeIdentity {
        &self.local
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn quorum(&self) -> usize {
        quorum_for(self.settings.replication_factor)
    }

    pub async fn coordinate_write(&self, key: &str, value: &str) -> Result<WriteAck, ReplicationError> {
        let ring = self.ring.snapshot();
        self.coordinate_write_on(&ring, key, value).await
    }

    /// Same as [`coordinate_write`](Self::coordinate_write), against a ring snapshot the
    /// caller already used to pick this node as primary.
    pub async fn coordinate_write_on(
        &self,
        ring: &RingSnapshot,
        key: &str,
        value: &str,
    ) -> Result<WriteAck, ReplicationError> {
        let replicas = self.replica_set(ring, key)?;
        let body = KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let message = WireMessage::json(MessageType::ReplicatePut, &body).map_err(|e| {
            ReplicationError::Encoding {
                message: e.to_string(),
            }
        })?;

        self.store.put(body.key, body.value);
        tracing::debug!("PUT {}: applied locally, replicating to {:?}", key, replicas);

        self.replicate(key, replicas, message).await
    }

    /// Removes `key` and replicates the removal. A key that is absent on the primary is
    /// reported as not found without contacting any replica.
    pub async fn coordinate_delete(&self, key: &str) -> Result<DeleteOutcome, ReplicationError> {
        let ring = self.ring.snapshot();
        self.coordinate_delete_on(&ring, key).await
    }

    pub async fn coordinate_delete_on(
        &self,
        ring: &RingSnapshot,
        key: &str,
    ) -> Result<DeleteOutcome, ReplicationError> {
        let replicas = self.replica_set(ring, key)?;

        if self.store.remove(key).is_none() {
            tracing::debug!("DELETE {}: key not present on primary", key);
            return Ok(DeleteOutcome::NotFound);
        }

        let message = WireMessage::new(MessageType::ReplicateDelete, key.to_string());
        self.replicate(key, replicas, message)
            .await
            .map(DeleteOutcome::Deleted)
    }

    /// Replica set for `key`, primary first. Only the primary may coordinate: the local
    /// apply counts toward the quorum solely because this node heads the set.
    fn replica_set(&self, ring: &RingSnapshot, key: &str) -> Result<Vec<NodeIdentity>, ReplicationError> {
        let replicas = ring.replicas_for(key, self.settings.replication_factor)?;
        match replicas.first() {
            Some(primary) if primary == &self.local => {}
            Some(primary) => {
                tracing::warn!("Key {}: refusing to coordinate, primary is {}", key, primary);
                return Err(ReplicationError::NotPrimary {
                    primary: primary.to_string(),
                });
            }
            None => return Err(ReplicationError::NoNodesAvailable),
        }

        let needed = self.quorum();
        if replicas.len() < needed {
            tracing::warn!(
                "Key {}: only {} distinct nodes on the ring, quorum needs {}",
                key,
                replicas.len(),
                needed
            );
            return Err(ReplicationError::InsufficientNodes {
                needed,
                available: replicas.len(),
            });
        }
        Ok(replicas)
    }

    async fn replicate(
        &self,
        key: &str,
        replicas: Vec<NodeIdentity>,
        message: WireMessage,
    ) -> Result<WriteAck, ReplicationError> {
        let needed = self.quorum();
        let total = replicas.len();
        let deadline = Instant::now() + self.settings.quorum_timeout;

        let targets: Vec<NodeIdentity> = replicas
            .into_iter()
            .filter(|node| node != &self.local)
            .collect();

        // Local apply already happened.
        let mut acks = 1usize;
        let mut pending = targets.len();

        let (tx, mut rx) = mpsc::channel(targets.len().max(1));
        for target in targets {
            let tx = tx.clone();
            let client = self.client;
            let message = message.clone();
            let offset = self.settings.peer_port_offset;
            tokio::spawn(async move {
                let acked = send_to_replica(&client, &target, offset, &message).await;
                // The coordinator may have stopped listening; that is fine.
                let _ = tx.send(acked).await;
            });
        }
        drop(tx);

        let mut cause = QuorumFailure::ReplicaFailures;
        while acks < needed && acks + pending >= needed {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(acked)) => {
                    pending -= 1;
                    if acked {
                        acks += 1;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    cause = QuorumFailure::Timeout;
                    break;
                }
            }
        }

        if acks >= needed {
            tracing::info!("Key {}: quorum reached with {}/{} acks", key, acks, total);
            Ok(WriteAck {
                key: key.to_string(),
                acks,
                replicas: total,
            })
        } else {
            tracing::warn!(
                "Key {}: quorum not met ({}), {} of {} acks, local apply kept",
                key,
                cause,
                acks,
                needed
            );
            Err(ReplicationError::QuorumNotMet {
                acks,
                needed,
                cause,
            })
        }
    }
}

async fn send_to_replica(
    client: &PeerClient,
    target: &NodeIdentity,
    offset: u16,
    message: &WireMessage,
) -> bool {
    let addr = match target.peer_addr(offset) {
        Ok(addr) => addr,
        Err(e) => {
            tracing::warn!("Skipping replica {}: {}", target, e);
            return false;
        }
    };

    match client.request(&addr, message).await {
        Ok(reply) if reply.kind == MessageType::ReplicationAck => {
            tracing::debug!("{:?} acknowledged by {}", message.kind, target);
            true
        }
        Ok(reply) => {
            tracing::warn!(
                "{:?} to {} answered with {:?} instead of an ack",
                message.kind,
                target,
                reply.kind
            );
            false
        }
        Err(e) => {
            tracing::warn!("{:?} to {} failed: {}", message.kind, target, e);
            false
        }
    }
}
