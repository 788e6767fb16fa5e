use super::protocol::{
    KeyValue, MessageType, ProtocolError, WireMessage, read_message, write_message,
};
use crate::storage::coordinator::ReplicationCoordinator;
use crate::storage::types::{DeleteOutcome, ReplicationError};
use anyhow::{Context, Result};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// A decoded inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRequest {
    Ping,
    ForwardPut(KeyValue),
    ForwardGet(String),
    ForwardDelete(String),
    ReplicatePut(KeyValue),
    ReplicateDelete(String),
    /// A response type, or a code this node does not know.
    Unrecognized(MessageType),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid key/value payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("key is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl PeerRequest {
    pub fn decode(message: &WireMessage) -> Result<Self, PayloadError> {
        let request = match message.kind {
            MessageType::Ping => PeerRequest::Ping,
            MessageType::ForwardPut => PeerRequest::ForwardPut(message.payload_json()?),
            MessageType::ForwardGet => PeerRequest::ForwardGet(message.payload_str()?.to_string()),
            MessageType::ForwardDelete => {
                PeerRequest::ForwardDelete(message.payload_str()?.to_string())
            }
            MessageType::ReplicatePut => PeerRequest::ReplicatePut(message.payload_json()?),
            MessageType::ReplicateDelete => {
                PeerRequest::ReplicateDelete(message.payload_str()?.to_string())
            }
            other => PeerRequest::Unrecognized(other),
        };
        Ok(request)
    }
}

/// Maps one inbound message to one reply.
///
/// Forwarded writes go through the coordinator, since the sender picked this node as
/// the key's primary. Replication traffic only touches the local store.
pub struct PeerRouter {
    coordinator: Arc<ReplicationCoordinator>,
}

impl PeerRouter {
    pub fn new(coordinator: Arc<ReplicationCoordinator>) -> Arc<Self> {
        Arc::new(Self { coordinator })
    }

    pub async fn dispatch(&self, message: WireMessage) -> WireMessage {
        let request = match PeerRequest::decode(&message) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Rejecting {:?}: {}", message.kind, e);
                return WireMessage::new(MessageType::Error, e.to_string());
            }
        };

        let store = self.coordinator.store();
        match request {
            PeerRequest::Ping => WireMessage::empty(MessageType::Pong),

            PeerRequest::ForwardPut(kv) => {
                match self.coordinator.coordinate_write(&kv.key, &kv.value).await {
                    Ok(ack) => json_reply(MessageType::OperationSuccess, &ack),
                    Err(e) => replication_error_reply(&e),
                }
            }

            PeerRequest::ForwardGet(key) => match store.get(&key) {
                Some(value) => json_reply(MessageType::ValueResponse, &KeyValue { key, value }),
                None => WireMessage::empty(MessageType::KeyNotFound),
            },

            PeerRequest::ForwardDelete(key) => match self.coordinator.coordinate_delete(&key).await {
                Ok(DeleteOutcome::Deleted(ack)) => json_reply(MessageType::OperationSuccess, &ack),
                Ok(DeleteOutcome::NotFound) => WireMessage::empty(MessageType::KeyNotFound),
                Err(e) => replication_error_reply(&e),
            },

            PeerRequest::ReplicatePut(kv) => {
                store.put(kv.key, kv.value);
                WireMessage::empty(MessageType::ReplicationAck)
            }

            PeerRequest::ReplicateDelete(key) => {
                store.remove(&key);
                WireMessage::empty(MessageType::ReplicationAck)
            }

            PeerRequest::Unrecognized(kind) => {
                tracing::warn!("Received unhandled message type {:?}", kind);
                WireMessage::empty(MessageType::Unknown)
            }
        }
    }
}

fn json_reply<T: Serialize>(kind: MessageType, body: &T) -> WireMessage {
    WireMessage::json(kind, body)
        .unwrap_or_else(|e| WireMessage::new(MessageType::Error, e.to_string()))
}

fn replication_error_reply(err: &ReplicationError) -> WireMessage {
    json_reply(MessageType::Error, err)
}

/// Accept loop for peer traffic. Each connection is handled on its own task.
pub struct PeerServer {
    listener: TcpListener,
    router: Arc<PeerRouter>,
    read_timeout: Duration,
}

impl PeerServer {
    /// `read_timeout` bounds how long a connection may take to deliver its request.
    pub async fn bind(addr: &str, router: Arc<PeerRouter>, read_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding peer listener on {}", addr))?;
        Ok(Self::new(listener, router, read_timeout))
    }

    /// Wraps an already bound listener.
    pub fn new(listener: TcpListener, router: Arc<PeerRouter>, read_timeout: Duration) -> Self {
        Self {
            listener,
            router,
            read_timeout,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("Peer listener on {}", addr);
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let router = self.router.clone();
                        let read_timeout = self.read_timeout;
                        tokio::spawn(async move {
                            handle_connection(stream, remote, router, read_timeout).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept peer connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = shutdown.changed() => {
                    tracing::info!("Peer listener shutting down");
                    break;
                }
            }
        }
    }
}

/// Reads one message, writes one reply, closes. Errors end this connection only.
async fn handle_connection(
    mut stream: TcpStream,
    remote: SocketAddr,
    router: Arc<PeerRouter>,
    read_timeout: Duration,
) {
    let read = tokio::time::timeout(read_timeout, read_message(&mut stream)).await;
    let request = match read {
        Ok(Ok(message)) => message,
        Ok(Err(ProtocolError::Closed)) => {
            tracing::debug!("Peer {} closed the connection without a message", remote);
            return;
        }
        Ok(Err(e)) => {
            tracing::warn!("Dropping connection from {}: {}", remote, e);
            return;
        }
        Err(_) => {
            tracing::warn!(
                "Dropping connection from {}: no complete request within {:?}",
                remote,
                read_timeout
            );
            return;
        }
    };

    tracing::debug!(
        "Received {:?} ({} bytes) from {}",
        request.kind,
        request.payload.len(),
        remote
    );

    let reply = router.dispatch(request).await;
    if let Err(e) = write_message(&mut stream, &reply).await {
        tracing::warn!("Failed to send {:?} to {}: {}", reply.kind, remote, e);
    }
}
