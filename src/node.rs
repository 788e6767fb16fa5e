//! Node assembly: one store, one ring, and the services that share them.

use crate::config::NodeConfig;
use crate::membership::oracle::{LocalOracle, OracleRegistry};
use crate::membership::prober::LivenessProber;
use crate::membership::service::{MembershipService, OracleMembership, ProbeMembership};
use crate::membership::types::{MembershipSnapshot, NodeIdentity};
use crate::peer::client::PeerClient;
use crate::peer::server::{PeerRouter, PeerServer};
use crate::storage::coordinator::ReplicationCoordinator;
use crate::storage::handlers::routes;
use crate::storage::memory::LocalStore;
use crate::storage::partitioner::HashRing;
use crate::storage::router::RequestRouter;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

/// Where a node learns the live set from.
pub enum MembershipStrategy {
    /// Probe a fixed list of candidate identities.
    Probe(Vec<NodeIdentity>),
    /// Register with a shared in-process oracle.
    Oracle(Arc<OracleRegistry>),
}

pub struct Node {
    pub config: NodeConfig,
    pub store: LocalStore,
    pub ring: Arc<HashRing>,
    pub membership: Arc<MembershipService>,
    pub coordinator: Arc<ReplicationCoordinator>,
    pub router: Arc<RequestRouter>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        let identity = config.identity();
        let store = LocalStore::new();
        let ring = HashRing::new(config.virtual_nodes);
        let membership = MembershipService::new(identity.clone(), ring.clone());

        let replica_client = PeerClient::new(config.connect_timeout, config.response_timeout);
        let coordinator = ReplicationCoordinator::new(
            identity,
            store.clone(),
            ring.clone(),
            replica_client,
            config.replication(),
        );

        let forwarder = PeerClient::new(config.connect_timeout, config.forward_timeout());
        let router = RequestRouter::new(
            coordinator.clone(),
            ring.clone(),
            forwarder,
            config.peer_port_offset,
        );

        Self {
            config,
            store,
            ring,
            membership,
            coordinator,
            router,
        }
    }

    /// Binds the peer listener on the identity's port plus the configured offset.
    pub async fn peer_server(&self) -> Result<PeerServer> {
        let addr = self.config.identity().peer_addr(self.config.peer_port_offset)?;
        PeerServer::bind(
            &addr,
            PeerRouter::new(self.coordinator.clone()),
            self.config.response_timeout,
        )
        .await
    }

    /// Runs the peer listener, membership, and the HTTP adapter until `shutdown` fires.
    ///
    /// Both listeners are bound before anything is spawned, so a bind failure leaves no
    /// task behind and never registers this node. Once the HTTP server returns, for any
    /// reason, the peer listener and membership are stopped and awaited.
    pub async fn run(self, strategy: MembershipStrategy, shutdown: watch::Receiver<bool>) -> Result<()> {
        let identity = self.config.identity();
        tracing::info!("Starting node {}", identity);

        let peer_server = self.peer_server().await?;
        let listener = tokio::net::TcpListener::bind(&self.config.bind)
            .await
            .with_context(|| format!("binding HTTP listener on {}", self.config.bind))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let peer_task = tokio::spawn(peer_server.run(stop_rx.clone()));

        let membership_task = match strategy {
            MembershipStrategy::Probe(candidates) => {
                self.membership.apply(MembershipSnapshot::new([identity.clone()]));
                let runner = ProbeMembership::new(
                    candidates,
                    LivenessProber::new(self.config.probing()),
                    self.membership.clone(),
                    self.config.probe_interval,
                );
                let stop = stop_rx.clone();
                tokio::spawn(async move {
                    runner.run(stop).await;
                    Ok(())
                })
            }
            MembershipStrategy::Oracle(registry) => {
                let runner = OracleMembership::new(
                    LocalOracle::new(registry),
                    self.membership.clone(),
                    self.config.grace_period,
                );
                tokio::spawn(runner.run(stop_rx.clone()))
            }
        };

        tracing::info!("HTTP server listening on {}", self.config.bind);
        let mut http_shutdown = shutdown;
        let served = axum::serve(listener, routes(self.router.clone()))
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
            })
            .await;

        stop_tx.send_replace(true);
        if let Err(e) = peer_task.await {
            tracing::warn!("Peer listener task for {} failed: {}", identity, e);
        }
        match membership_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Membership for {} stopped with error: {}", identity, e),
            Err(e) => tracing::warn!("Membership task for {} failed: {}", identity, e),
        }

        served.with_context(|| format!("HTTP server on {}", self.config.bind))?;
        tracing::info!("Node {} stopped", identity);
        Ok(())
    }
}
