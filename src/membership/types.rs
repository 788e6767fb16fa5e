use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// `host:port` of a node's client-facing address.
///
/// Used as the value stored on the ring and, together with the peer port offset, as the
/// dial target for peer traffic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIdentity(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("node identity {0:?} is not a host:port pair")]
pub struct InvalidIdentity(pub String);

impl NodeIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address of the node's peer listener: same host, port shifted by `offset`.
    pub fn peer_addr(&self, offset: u16) -> Result<String, InvalidIdentity> {
        let (host, port) = self
            .0
            .rsplit_once(':')
            .ok_or_else(|| InvalidIdentity(self.0.clone()))?;
        let port: u16 = port.parse().map_err(|_| InvalidIdentity(self.0.clone()))?;
        let peer_port = port
            .checked_add(offset)
            .ok_or_else(|| InvalidIdentity(self.0.clone()))?;
        Ok(format!("{}:{}", host, peer_port))
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The live node set at one point in time. Ordered, so two nodes holding the same
/// members always iterate them identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    nodes: BTreeSet<NodeIdentity>,
}

impl MembershipSnapshot {
    pub fn new(nodes: impl IntoIterator<Item = NodeIdentity>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeIdentity> {
        self.nodes.iter()
    }

    pub fn contains(&self, node: &NodeIdentity) -> bool {
        self.nodes.contains(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<NodeIdentity> for MembershipSnapshot {
    fn from_iter<I: IntoIterator<Item = NodeIdentity>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for MembershipSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.nodes.iter().map(NodeIdentity::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Reachability of a probed peer, as last classified by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Reachable,
    Unreachable,
}
