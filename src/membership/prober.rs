use super::types::NodeIdentity;
use crate::peer::client::PeerClient;
use crate::peer::protocol::{MessageType, WireMessage};
use anyhow::Result;
use std::time::Duration;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PROBE_ATTEMPTS: usize = 5;
pub const DEFAULT_PROBE_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Bound on connecting and on waiting for the PONG, per attempt.
    pub timeout: Duration,
    pub attempts: usize,
    /// Fixed pause between attempts.
    pub backoff: Duration,
    pub peer_port_offset: u16,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
            attempts: DEFAULT_PROBE_ATTEMPTS,
            backoff: DEFAULT_PROBE_BACKOFF,
            peer_port_offset: 0,
        }
    }
}

/// Classifies a peer as reachable by exchanging PING/PONG.
#[derive(Debug, Clone)]
pub struct LivenessProber {
    client: PeerClient,
    settings: ProbeSettings,
}

impl LivenessProber {
    pub fn new(settings: ProbeSettings) -> Self {
        Self {
            client: PeerClient::new(settings.timeout, settings.timeout),
            settings,
        }
    }

    /// Returns `false` once every attempt has failed. Never waits longer than
    /// `attempts * (2 * timeout) + (attempts - 1) * backoff`.
    pub async fn probe(&self, node: &NodeIdentity) -> bool {
        let addr = match node.peer_addr(self.settings.peer_port_offset) {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!("Cannot probe {}: {}", node, e);
                return false;
            }
        };

        let attempts = self.settings.attempts.max(1);
        for attempt in 1..=attempts {
            match self.ping(&addr).await {
                Ok(()) => {
                    tracing::debug!("Pong from {} on attempt {}", node, attempt);
                    return true;
                }
                Err(e) => {
                    tracing::debug!("Attempt {}/{} to ping {} failed: {}", attempt, attempts, node, e);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.settings.backoff).await;
            }
        }

        false
    }

    async fn ping(&self, addr: &str) -> Result<()> {
        let reply = self
            .client
            .request(addr, &WireMessage::empty(MessageType::Ping))
            .await?;
        if reply.kind != MessageType::Pong {
            anyhow::bail!("expected PONG, got {:?}", reply.kind);
        }
        Ok(())
    }
}
