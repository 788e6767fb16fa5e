//! Membership Module Tests
//!
//! ## Test Scopes
//! - **Data Structures**: Identity parsing and snapshot ordering.
//! - **Service Logic**: Applying snapshots and the ring rebuild that follows.
//! - **Prober**: Reachability against live, stopped and unbound peers.
//! - **Oracle**: Registration, notifications, and the full oracle-driven loop.

#[cfg(test)]
mod tests {
    use crate::membership::oracle::{LocalOracle, MembershipChange, MembershipOracle, OracleRegistry};
    use crate::membership::prober::{LivenessProber, ProbeSettings};
    use crate::membership::service::{MembershipService, OracleMembership, ProbeMembership};
    use crate::membership::types::{InvalidIdentity, MembershipSnapshot, NodeIdentity, NodeState};
    use crate::node::testing::{dead_identity, start_node};
    use crate::peer::protocol::{MessageType, WireMessage, read_message, write_message};
    use crate::storage::partitioner::HashRing;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::watch;

    fn fast_probe_settings() -> ProbeSettings {
        ProbeSettings {
            timeout: Duration::from_millis(300),
            attempts: 2,
            backoff: Duration::from_millis(10),
            peer_port_offset: 0,
        }
    }

    fn service(name: &str) -> Arc<MembershipService> {
        MembershipService::new(NodeIdentity::new(name), HashRing::new(10))
    }

    /// Listener that hangs up on the first `failures` connections and answers PING with
    /// PONG afterwards. Returns its identity and the number of connections accepted.
    async fn flaky_peer(failures: usize) -> (NodeIdentity, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let identity = NodeIdentity::new(listener.local_addr().unwrap().to_string());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let seen = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if seen <= failures {
                    drop(stream);
                    continue;
                }
                if read_message(&mut stream).await.is_ok() {
                    let _ = write_message(&mut stream, &WireMessage::empty(MessageType::Pong)).await;
                }
            }
        });

        (identity, accepted)
    }

    async fn wait_for_members(service: &MembershipService, expected: usize) -> bool {
        for _ in 0..100 {
            if service.members().len() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    // ============================================================
    // IDENTITY & SNAPSHOT TESTS
    // ============================================================

    #[test]
    fn test_peer_addr_applies_offset() {
        let node = NodeIdentity::new("10.0.0.1:8000");
        assert_eq!(node.peer_addr(2).unwrap(), "10.0.0.1:8002");
        assert_eq!(node.peer_addr(0).unwrap(), "10.0.0.1:8000");

        let host = NodeIdentity::new("node-a.internal:9000");
        assert_eq!(host.peer_addr(2).unwrap(), "node-a.internal:9002");
    }

    #[test]
    fn test_peer_addr_rejects_malformed_identity() {
        assert_eq!(
            NodeIdentity::new("no-port").peer_addr(2),
            Err(InvalidIdentity("no-port".to_string()))
        );
        assert!(NodeIdentity::new("host:http").peer_addr(2).is_err());
        assert!(NodeIdentity::new("host:65535").peer_addr(2).is_err());
    }

    #[test]
    fn test_snapshot_is_ordered_and_deduplicated() {
        let a: MembershipSnapshot = ["c:1", "a:1", "b:1", "a:1"]
            .into_iter()
            .map(NodeIdentity::from)
            .collect();
        let b: MembershipSnapshot = ["b:1", "c:1", "a:1"].into_iter().map(NodeIdentity::from).collect();

        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.to_string(), "[a:1, b:1, c:1]");
        assert!(a.contains(&NodeIdentity::new("b:1")));
        assert!(MembershipSnapshot::empty().is_empty());
    }

    // ============================================================
    // SERVICE TESTS
    // ============================================================

    #[test]
    fn test_apply_rebuilds_ring_only_on_change() {
        let service = service("a:1");
        let snapshot: MembershipSnapshot = ["a:1", "b:1"].into_iter().map(NodeIdentity::from).collect();

        assert!(service.apply(snapshot.clone()));
        let generation = service.ring().snapshot().generation();
        assert_eq!(service.ring().snapshot().owner_count(), 2);
        assert_eq!(service.members(), snapshot);

        // Same set again: nothing to do.
        assert!(!service.apply(snapshot));
        assert_eq!(service.ring().snapshot().generation(), generation);

        assert!(service.apply(MembershipSnapshot::new([NodeIdentity::new("a:1")])));
        assert_eq!(service.ring().snapshot().owner_count(), 1);
    }

    #[tokio::test]
    async fn test_watch_sees_applied_changes() {
        let service = service("a:1");
        let mut rx = service.watch();

        service.apply(MembershipSnapshot::new([NodeIdentity::new("a:1")]));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);
    }

    // ============================================================
    // PROBER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_probe_live_peer_is_reachable() {
        let peer = start_node(|_| {}).await;
        let prober = LivenessProber::new(fast_probe_settings());
        assert!(prober.probe(&peer.identity).await);
    }

    #[tokio::test]
    async fn test_probe_unbound_peer_is_unreachable() {
        let prober = LivenessProber::new(fast_probe_settings());
        assert!(!prober.probe(&dead_identity().await).await);
        assert!(!prober.probe(&NodeIdentity::new("not-an-address")).await);
    }

    #[tokio::test]
    async fn test_probe_retries_until_peer_answers() {
        let (peer, accepted) = flaky_peer(2).await;
        let settings = ProbeSettings {
            attempts: 5,
            backoff: Duration::from_millis(100),
            ..fast_probe_settings()
        };
        let prober = LivenessProber::new(settings);

        let started = tokio::time::Instant::now();
        assert!(prober.probe(&peer).await);
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
        // Two failed attempts, each followed by one backoff pause.
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_probe_recovers_when_listener_appears_late() {
        let target = dead_identity().await;
        let settings = ProbeSettings {
            attempts: 10,
            backoff: Duration::from_millis(100),
            ..fast_probe_settings()
        };
        let prober = LivenessProber::new(settings);
        let probing = {
            let target = target.clone();
            tokio::spawn(async move { prober.probe(&target).await })
        };

        // The first attempt is refused; start answering afterwards.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let listener = TcpListener::bind(target.as_str()).await.unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                if read_message(&mut stream).await.is_ok() {
                    let _ = write_message(&mut stream, &WireMessage::empty(MessageType::Pong)).await;
                }
            }
        });

        assert!(probing.await.unwrap());
    }

    #[tokio::test]
    async fn test_probe_dials_exactly_attempts_times() {
        let (peer, accepted) = flaky_peer(usize::MAX).await;
        let settings = ProbeSettings {
            attempts: 3,
            backoff: Duration::from_millis(50),
            ..fast_probe_settings()
        };
        let prober = LivenessProber::new(settings);

        let started = tokio::time::Instant::now();
        assert!(!prober.probe(&peer).await);
        assert!(started.elapsed() >= Duration::from_millis(100));

        // Give a stray extra dial the chance to show up before counting.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_probe_cycle_tracks_peers_coming_and_going() {
        let peer = start_node(|_| {}).await;
        let dead = dead_identity().await;
        let local = NodeIdentity::new("127.0.0.1:1");
        let service = MembershipService::new(local.clone(), HashRing::new(10));
        let membership = ProbeMembership::new(
            vec![local.clone(), peer.identity.clone(), dead.clone()],
            LivenessProber::new(fast_probe_settings()),
            service,
            Duration::from_millis(50),
        );

        let mut states = HashMap::new();
        let live = membership.probe_cycle(&mut states).await;
        assert_eq!(live, MembershipSnapshot::new([local.clone(), peer.identity.clone()]));
        assert_eq!(states.get(&peer.identity), Some(&NodeState::Reachable));
        assert_eq!(states.get(&dead), Some(&NodeState::Unreachable));
        assert!(!states.contains_key(&local), "The local node is never probed");

        peer.stop();
        let mut gone = false;
        for _ in 0..20 {
            let live = membership.probe_cycle(&mut states).await;
            if !live.contains(&peer.identity) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "Stopped peer should drop out of the live set");
        assert_eq!(states.get(&peer.identity), Some(&NodeState::Unreachable));
    }

    #[tokio::test]
    async fn test_probe_membership_run_updates_ring() {
        let peer = start_node(|_| {}).await;
        let service = service("127.0.0.1:1");
        let membership = ProbeMembership::new(
            vec![peer.identity.clone()],
            LivenessProber::new(fast_probe_settings()),
            service.clone(),
            Duration::from_millis(50),
        );

        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(membership.run(rx));

        assert!(wait_for_members(&service, 2).await);
        assert_eq!(service.ring().snapshot().owner_count(), 2);

        shutdown.send_replace(true);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("prober should stop on shutdown")
            .unwrap();
    }

    // ============================================================
    // ORACLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_oracle_requires_connect() {
        let oracle = LocalOracle::new(OracleRegistry::new());
        assert!(oracle.register_self(&NodeIdentity::new("a:1")).await.is_err());
        assert!(oracle.live_nodes().await.is_err());

        oracle.connect().await.unwrap();
        oracle.register_self(&NodeIdentity::new("a:1")).await.unwrap();
        assert_eq!(oracle.live_nodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_oracle_notifies_joins_and_leaves() {
        let registry = OracleRegistry::new();
        let watcher = LocalOracle::new(registry.clone());
        watcher.connect().await.unwrap();
        let mut changes = watcher.subscribe().await.unwrap();

        let member = LocalOracle::new(registry.clone());
        member.connect().await.unwrap();
        member.register_self(&NodeIdentity::new("b:1")).await.unwrap();
        assert_eq!(
            changes.recv().await,
            Some(MembershipChange::Joined(NodeIdentity::new("b:1")))
        );
        assert!(registry.live_nodes().await.contains(&NodeIdentity::new("b:1")));

        // Closing the session removes its record.
        member.close().await.unwrap();
        assert_eq!(
            changes.recv().await,
            Some(MembershipChange::Left(NodeIdentity::new("b:1")))
        );
        assert!(registry.live_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_session_close_keeps_newer_registration() {
        let registry = OracleRegistry::new();
        let identity = NodeIdentity::new("a:1");

        let stale = LocalOracle::new(registry.clone());
        stale.connect().await.unwrap();
        stale.register_self(&identity).await.unwrap();

        // A restarted node registers the same identity from a fresh session.
        let fresh = LocalOracle::new(registry.clone());
        fresh.connect().await.unwrap();
        fresh.register_self(&identity).await.unwrap();
        assert_eq!(registry.live_nodes().await.len(), 1);

        stale.close().await.unwrap();
        assert!(registry.live_nodes().await.contains(&identity));

        fresh.close().await.unwrap();
        assert!(registry.live_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn test_oracle_membership_converges_and_handles_departure() {
        let registry = OracleRegistry::new();
        let first = service("a:1");
        let second = service("b:1");

        let (stop_first, rx_first) = watch::channel(false);
        let (stop_second, rx_second) = watch::channel(false);
        let grace = Duration::from_millis(50);
        let first_task = tokio::spawn(
            OracleMembership::new(LocalOracle::new(registry.clone()), first.clone(), grace).run(rx_first),
        );
        let second_task = tokio::spawn(
            OracleMembership::new(LocalOracle::new(registry.clone()), second.clone(), grace).run(rx_second),
        );

        assert!(wait_for_members(&first, 2).await);
        assert!(wait_for_members(&second, 2).await);
        assert_eq!(
            first.ring().primary_for("some-key").unwrap(),
            second.ring().primary_for("some-key").unwrap()
        );

        stop_second.send_replace(true);
        second_task.await.unwrap().unwrap();
        assert!(wait_for_members(&first, 1).await);
        assert_eq!(first.members(), MembershipSnapshot::new([NodeIdentity::new("a:1")]));

        stop_first.send_replace(true);
        first_task.await.unwrap().unwrap();
        assert!(registry.live_nodes().await.is_empty());
    }
}
