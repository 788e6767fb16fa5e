use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::oracle::MembershipOracle;
use super::prober::LivenessProber;
use super::types::{MembershipSnapshot, NodeIdentity, NodeState};
use crate::storage::partitioner::HashRing;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Owns the node's view of the live set and keeps the ring in step with it.
///
/// Both membership strategies feed [`apply`](Self::apply). The snapshot and the ring
/// are updated together under the watch channel's write lock, so concurrent appliers
/// cannot interleave rebuilds.
pub struct MembershipService {
    local: NodeIdentity,
    ring: Arc<HashRing>,
    current: watch::Sender<MembershipSnapshot>,
}

impl MembershipService {
    pub fn new(local: NodeIdentity, ring: Arc<HashRing>) -> Arc<Self> {
        let (current, _) = watch::channel(MembershipSnapshot::empty());
        Arc::new(Self {
            local,
            ring,
            current,
        })
    }

    pub fn local(&self) -> &NodeIdentity {
        &self.local
    }

    pub fn ring(&self) -> &Arc<HashRing> {
        &self.ring
    }

    /// Installs `snapshot` and rebuilds the ring if it differs from the current one.
    /// Returns whether anything changed.
    pub fn apply(&self, snapshot: MembershipSnapshot) -> bool {
        let ring = &self.ring;
        self.current.send_if_modified(move |current| {
            if *current == snapshot {
                return false;
            }
            tracing::info!("Membership changed: {} -> {}", current, snapshot);
            ring.rebuild(&snapshot);
            *current = snapshot;
            true
        })
    }

    pub fn members(&self) -> MembershipSnapshot {
        self.current.borrow().clone()
    }

    /// Receiver that wakes on every applied change.
    pub fn watch(&self) -> watch::Receiver<MembershipSnapshot> {
        self.current.subscribe()
    }
}

/// Membership driven by an external oracle.
pub struct OracleMembership<O> {
    oracle: O,
    service: Arc<MembershipService>,
    grace: Duration,
}

impl<O: MembershipOracle> OracleMembership<O> {
    pub fn new(oracle: O, service: Arc<MembershipService>, grace: Duration) -> Self {
        Self {
            oracle,
            service,
            grace,
        }
    }

    /// Registers, waits out the grace window, builds the ring once, then re-lists and
    /// rebuilds after every notification until shutdown. The session is closed on exit,
    /// which drops this node's record.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.oracle.connect().await?;
        self.oracle.register_self(self.service.local()).await?;
        let mut changes = self.oracle.subscribe().await?;

        tracing::info!(
            "Registered {} with membership oracle, waiting {:?} for peers",
            self.service.local(),
            self.grace
        );

        tokio::select! {
            _ = tokio::time::sleep(self.grace) => {}
            _ = shutdown.changed() => {
                return self.oracle.close().await;
            }
        }
        self.refresh().await?;

        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Some(change) => {
                        tracing::debug!("Membership notification: {:?}", change);
                        while let Ok(queued) = changes.try_recv() {
                            tracing::debug!("Membership notification: {:?}", queued);
                        }
                        if let Err(e) = self.refresh().await {
                            tracing::warn!("Failed to refresh live nodes: {}", e);
                        }
                    }
                    None => {
                        tracing::warn!("Membership oracle ended the subscription");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Closing membership oracle session for {}", self.service.local());
        self.oracle.close().await
    }

    async fn refresh(&self) -> Result<()> {
        let live = self.oracle.live_nodes().await?;
        self.service.apply(live);
        Ok(())
    }
}

/// Membership driven by probing a fixed candidate list.
pub struct ProbeMembership {
    candidates: Vec<NodeIdentity>,
    prober: LivenessProber,
    service: Arc<MembershipService>,
    interval: Duration,
}

impl ProbeMembership {
    pub fn new(
        candidates: Vec<NodeIdentity>,
        prober: LivenessProber,
        service: Arc<MembershipService>,
        interval: Duration,
    ) -> Self {
        Self {
            candidates,
            prober,
            service,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Probing {} candidate peers every {:?}",
            self.candidates.len(),
            self.interval
        );
        let mut states = HashMap::new();

        loop {
            tokio::select! {
                snapshot = self.probe_cycle(&mut states) => {
                    self.service.apply(snapshot);
                }
                _ = shutdown.changed() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Prober for {} stopped", self.service.local());
    }

    /// Probes every candidate concurrently. The local node is always part of the result.
    pub async fn probe_cycle(
        &self,
        states: &mut HashMap<NodeIdentity, NodeState>,
    ) -> MembershipSnapshot {
        let local = self.service.local();
        let probes = self
            .candidates
            .iter()
            .filter(|candidate| *candidate != local)
            .map(|peer| async move { (peer.clone(), self.prober.probe(peer).await) });
        let results = futures::future::join_all(probes).await;

        let mut live = vec![local.clone()];
        for (peer, reachable) in results {
            let state = if reachable {
                NodeState::Reachable
            } else {
                NodeState::Unreachable
            };
            if states.insert(peer.clone(), state) != Some(state) {
                tracing::info!("Peer {} is now {:?}", peer, state);
            }
            if reachable {
                live.push(peer);
            }
        }

        MembershipSnapshot::new(live)
    }
}
