//! Consistent-hash ring.
//!
//! Each node contributes `virtual_nodes` positions, `hash(identity + index)`. A key is
//! owned by the first position at or after `hash(key)`, wrapping to the start of the
//! ring. Readers always work on an immutable [`RingSnapshot`]; a rebuild constructs a
//! new snapshot off to the side and swaps it in atomically, so a lookup never sees a
//! half-built ring.

use crate::membership::types::{MembershipSnapshot, NodeIdentity};
use arc_swap::ArcSwap;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub const DEFAULT_VIRTUAL_NODES: usize = 100;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("no nodes available")]
    NoNodesAvailable,
}

/// First 8 bytes of the MD5 digest, big-endian. Identical on every node and across
/// restarts.
pub fn ring_hash(input: &str) -> u64 {
    let digest = Md5::digest(input.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

#[derive(Debug, Default)]
pub struct RingSnapshot {
    positions: BTreeMap<u64, NodeIdentity>,
    members: MembershipSnapshot,
    owners: usize,
    generation: u64,
}

impl RingSnapshot {
    fn build(members: &MembershipSnapshot, virtual_nodes: usize, generation: u64) -> Self {
        let mut positions = BTreeMap::new();
        // Members iterate in sorted order; on a position collision the later node wins.
        for node in members.nodes() {
            for index in 0..virtual_nodes {
                let position = ring_hash(&format!("{}{}", node, index));
                positions.insert(position, node.clone());
            }
        }

        let mut distinct: Vec<&NodeIdentity> = positions.values().collect();
        distinct.sort();
        distinct.dedup();
        let owners = distinct.len();

        Self {
            positions,
            members: members.clone(),
            owners,
            generation,
        }
    }

    pub fn primary_for(&self, key: &str) -> Result<NodeIdentity, RingError> {
        let hash = ring_hash(key);
        self.positions
            .range(hash..)
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(_, owner)| owner.clone())
            .ok_or(RingError::NoNodesAvailable)
    }

    /// Distinct owners clockwise from `hash(key)`, primary first. Returns fewer than
    /// `count` entries when the ring has fewer distinct nodes.
    pub fn replicas_for(&self, key: &str, count: usize) -> Result<Vec<NodeIdentity>, RingError> {
        if self.positions.is_empty() {
            return Err(RingError::NoNodesAvailable);
        }

        let hash = ring_hash(key);
        let wanted = count.min(self.owners);
        let mut replicas: Vec<NodeIdentity> = Vec::with_capacity(wanted);

        let clockwise = self
            .positions
            .range(hash..)
            .chain(self.positions.range(..hash));
        for (_, owner) in clockwise {
            if replicas.len() >= wanted {
                break;
            }
            if !replicas.contains(owner) {
                replicas.push(owner.clone());
            }
        }

        Ok(replicas)
    }

    pub fn members(&self) -> &MembershipSnapshot {
        &self.members
    }

    /// Number of distinct nodes that own at least one position.
    pub fn owner_count(&self) -> usize {
        self.owners
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

pub struct HashRing {
    virtual_nodes: usize,
    current: ArcSwap<RingSnapshot>,
    generation: AtomicU64,
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Arc<Self> {
        Arc::new(Self {
            virtual_nodes: virtual_nodes.max(1),
            current: ArcSwap::from_pointee(RingSnapshot::default()),
            generation: AtomicU64::new(0),
        })
    }

    /// Replaces the ring wholesale. Rebuilding twice from the same snapshot yields the
    /// same placement.
    pub fn rebuild(&self, members: &MembershipSnapshot) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let snapshot = RingSnapshot::build(members, self.virtual_nodes, generation);
        tracing::info!(
            "Ring rebuilt (gen={}): {} nodes, {} positions",
            generation,
            snapshot.owner_count(),
            snapshot.position_count()
        );
        self.current.store(Arc::new(snapshot));
    }

    /// The ring as of now. Callers that need several lookups to agree should hold on to
    /// one snapshot rather than calling the ring repeatedly.
    pub fn snapshot(&self) -> Arc<RingSnapshot> {
        self.current.load_full()
    }

    pub fn primary_for(&self, key: &str) -> Result<NodeIdentity, RingError> {
        self.current.load().primary_for(key)
    }

    pub fn replicas_for(&self, key: &str, count: usize) -> Result<Vec<NodeIdentity>, RingError> {
        self.current.load().replicas_for(key, count)
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }
}
