//! Node configuration.
//!
//! Everything here is fixed for the lifetime of the process. [`NodeConfig::default`]
//! carries the reference values; the binary overrides them from the command line.

use crate::membership::prober::{
    DEFAULT_PROBE_ATTEMPTS, DEFAULT_PROBE_BACKOFF, DEFAULT_PROBE_TIMEOUT, ProbeSettings,
};
use crate::membership::service::{DEFAULT_GRACE_PERIOD, DEFAULT_PROBE_INTERVAL};
use crate::membership::types::NodeIdentity;
use crate::storage::coordinator::{ReplicationSettings, quorum_for};
use crate::storage::partitioner::DEFAULT_VIRTUAL_NODES;
use clap::Parser;
use std::time::Duration;

pub const DEFAULT_REPLICATION_FACTOR: usize = 3;
pub const DEFAULT_PEER_PORT_OFFSET: u16 = 2;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_QUORUM_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Client-facing `host:port`; also the node's identity on the ring.
    pub bind: String,
    /// The peer listener runs on the bind port plus this offset.
    pub peer_port_offset: u16,
    pub replication_factor: usize,
    pub virtual_nodes: usize,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub quorum_timeout: Duration,
    pub probe_timeout: Duration,
    pub probe_attempts: usize,
    pub probe_backoff: Duration,
    pub probe_interval: Duration,
    pub grace_period: Duration,
    /// Candidate peers for probe-driven membership.
    pub peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            peer_port_offset: DEFAULT_PEER_PORT_OFFSET,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            quorum_timeout: DEFAULT_QUORUM_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            probe_attempts: DEFAULT_PROBE_ATTEMPTS,
            probe_backoff: DEFAULT_PROBE_BACKOFF,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity::new(self.bind.clone())
    }

    pub fn quorum(&self) -> usize {
        quorum_for(self.replication_factor)
    }

    pub fn replication(&self) -> ReplicationSettings {
        ReplicationSettings {
            replication_factor: self.replication_factor,
            quorum_timeout: self.quorum_timeout,
            peer_port_offset: self.peer_port_offset,
        }
    }

    pub fn probing(&self) -> ProbeSettings {
        ProbeSettings {
            timeout: self.probe_timeout,
            attempts: self.probe_attempts,
            backoff: self.probe_backoff,
            peer_port_offset: self.peer_port_offset,
        }
    }

    /// How long a forwarding node waits for the primary. The primary may spend the
    /// whole quorum wait before answering, so this covers it plus one response timeout.
    pub fn forward_timeout(&self) -> Duration {
        self.quorum_timeout + self.response_timeout
    }

    /// Same settings for another node of a local cluster.
    pub fn with_bind(&self, bind: String) -> Self {
        Self {
            bind,
            ..self.clone()
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "distributed-kv", about = "Partitioned, replicated in-memory key-value store")]
pub struct Cli {
    /// Client-facing address, also used as this node's identity
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub bind: String,

    /// Candidate peer identity (host:port); repeat for each peer
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// Run this many nodes in-process, sharing an in-memory membership oracle
    #[arg(long)]
    pub local_cluster: Option<usize>,

    #[arg(long, default_value_t = DEFAULT_PEER_PORT_OFFSET)]
    pub peer_port_offset: u16,

    #[arg(long, default_value_t = DEFAULT_REPLICATION_FACTOR)]
    pub replication_factor: usize,

    #[arg(long, default_value_t = DEFAULT_VIRTUAL_NODES)]
    pub virtual_nodes: usize,

    #[arg(long, default_value_t = 2_000)]
    pub connect_timeout_ms: u64,

    #[arg(long, default_value_t = 3_000)]
    pub response_timeout_ms: u64,

    #[arg(long, default_value_t = 5_000)]
    pub quorum_timeout_ms: u64,

    #[arg(long, default_value_t = 5_000)]
    pub probe_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_PROBE_ATTEMPTS)]
    pub probe_attempts: usize,

    #[arg(long, default_value_t = 500)]
    pub probe_backoff_ms: u64,

    #[arg(long, default_value_t = 2_000)]
    pub probe_interval_ms: u64,

    #[arg(long, default_value_t = 2_000)]
    pub grace_period_ms: u64,
}

impl Cli {
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            bind: self.bind.clone(),
            peer_port_offset: self.peer_port_offset,
            replication_factor: self.replication_factor.max(1),
            virtual_nodes: self.virtual_nodes.max(1),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            quorum_timeout: Duration::from_millis(self.quorum_timeout_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            probe_attempts: self.probe_attempts.max(1),
            probe_backoff: Duration::from_millis(self.probe_backoff_ms),
            probe_interval: Duration::from_millis(self.probe_interval_ms),
            grace_period: Duration::from_millis(self.grace_period_ms),
            peers: self.peers.clone(),
        }
    }
}
