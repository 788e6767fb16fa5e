use super::protocol::{ProtocolError, WireMessage, read_message, write_message};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("connect to {peer} failed: {source}")]
    Connect {
        peer: String,
        #[source]
        source: io::Error,
    },

    #[error("connect to {peer} timed out after {timeout:?}")]
    ConnectTimeout { peer: String, timeout: Duration },

    #[error("no response from {peer} within {timeout:?}")]
    ResponseTimeout { peer: String, timeout: Duration },

    #[error("protocol error with {peer}: {source}")]
    Protocol {
        peer: String,
        #[source]
        source: ProtocolError,
    },
}

/// One-shot request/response over a fresh connection.
///
/// A connection carries exactly one exchange; nothing is pooled or retried here.
#[derive(Debug, Clone, Copy)]
pub struct PeerClient {
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl PeerClient {
    pub fn new(connect_timeout: Duration, response_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            response_timeout,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub async fn request(&self, peer: &str, message: &WireMessage) -> Result<WireMessage, PeerError> {
        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(peer)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(PeerError::Connect {
                    peer: peer.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(PeerError::ConnectTimeout {
                    peer: peer.to_string(),
                    timeout: self.connect_timeout,
                });
            }
        };

        let exchange = async {
            write_message(&mut stream, message).await?;
            read_message(&mut stream).await
        };

        match timeout(self.response_timeout, exchange).await {
            Ok(Ok(reply)) => {
                tracing::debug!("{:?} from {} answered with {:?}", message.kind, peer, reply.kind);
                Ok(reply)
            }
            Ok(Err(source)) => Err(PeerError::Protocol {
                peer: peer.to_string(),
                source,
            }),
            Err(_) => Err(PeerError::ResponseTimeout {
                peer: peer.to_string(),
                timeout: self.response_timeout,
            }),
        }
    }
}
