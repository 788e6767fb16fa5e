//! Membership oracle.
//!
//! The oracle is the authoritative source of the live node set: nodes register an
//! ephemeral record for themselves, watch for changes, and list the current records.
//! [`MembershipOracle`] is the seam; [`LocalOracle`] implements it over an in-process
//! [`OracleRegistry`], which is enough to run several nodes in one process.

use super::types::{MembershipSnapshot, NodeIdentity};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

/// A change notification. Subscribers re-list the live set rather than trusting the
/// payload, so notifications may be coalesced or repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Joined(NodeIdentity),
    Left(NodeIdentity),
}

#[async_trait]
pub trait MembershipOracle: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Creates this session's ephemeral record. It disappears on [`close`](Self::close).
    async fn register_self(&self, identity: &NodeIdentity) -> Result<()>;

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<MembershipChange>>;

    async fn live_nodes(&self) -> Result<MembershipSnapshot>;

    async fn close(&self) -> Result<()>;
}

#[derive(Default)]
struct RegistryState {
    /// Identity to the session that owns its record.
    nodes: BTreeMap<NodeIdentity, u64>,
    subscribers: Vec<mpsc::UnboundedSender<MembershipChange>>,
}

impl RegistryState {
    fn notify(&mut self, change: MembershipChange) {
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

/// Shared record store behind every [`LocalOracle`] session.
#[derive(Default)]
pub struct OracleRegistry {
    state: Mutex<RegistryState>,
    next_session: AtomicU64,
}

impl OracleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn open_session(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    /// A record left by another session is replaced; the new session owns it.
    async fn register(&self, node: &NodeIdentity, session: u64) {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.nodes.insert(node.clone(), session) {
            if previous != session {
                tracing::info!("Replacing stale registration for {}", node);
            }
        }
        state.notify(MembershipChange::Joined(node.clone()));
    }

    /// Removes the record only if `session` still owns it.
    async fn deregister(&self, node: &NodeIdentity, session: u64) {
        let mut state = self.state.lock().await;
        if state.nodes.get(node) != Some(&session) {
            tracing::debug!("Record for {} is owned by another session, keeping it", node);
            return;
        }
        state.nodes.remove(node);
        state.notify(MembershipChange::Left(node.clone()));
    }

    async fn subscribe(&self) -> mpsc::UnboundedReceiver<MembershipChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.subscribers.push(tx);
        rx
    }

    pub async fn live_nodes(&self) -> MembershipSnapshot {
        self.state.lock().await.nodes.keys().cloned().collect()
    }
}

/// One node's session with an [`OracleRegistry`].
pub struct LocalOracle {
    registry: Arc<OracleRegistry>,
    session: u64,
    connected: AtomicBool,
    registered: Mutex<Option<NodeIdentity>>,
}

impl LocalOracle {
    pub fn new(registry: Arc<OracleRegistry>) -> Self {
        Self {
            session: registry.open_session(),
            registry,
            connected: AtomicBool::new(false),
            registered: Mutex::new(None),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            anyhow::bail!("membership oracle session is not connected");
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipOracle for LocalOracle {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn register_self(&self, identity: &NodeIdentity) -> Result<()> {
        self.ensure_connected()?;
        self.registry.register(identity, self.session).await;
        *self.registered.lock().await = Some(identity.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<MembershipChange>> {
        self.ensure_connected()?;
        Ok(self.registry.subscribe().await)
    }

    async fn live_nodes(&self) -> Result<MembershipSnapshot> {
        self.ensure_connected()?;
        Ok(self.registry.live_nodes().await)
    }

    async fn close(&self) -> Result<()> {
        if let Some(identity) = self.registered.lock().await.take() {
            self.registry.deregister(&identity, self.session).await;
        }
        self.connected.store(false, Ordering::Release);
        Ok(())
    }
}
