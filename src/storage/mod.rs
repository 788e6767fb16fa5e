//! Distributed Storage Module
//!
//! Partitioned, replicated in-memory key-value storage.
//!
//! ## Core Concepts
//! - **Partitioning**: `HashRing` places keys on a consistent-hash ring with virtual nodes.
//! - **Replication**: `ReplicationCoordinator` runs on the key's primary, applies locally
//!   and waits for a quorum of REPLICATE acknowledgments.
//! - **Access**: `RequestRouter` serves a key locally when this node is primary and
//!   forwards it otherwise. `handlers` exposes it over HTTP.

pub mod coordinator;
pub mod handlers;
pub mod memory;
pub mod partitioner;
pub mod protocol;
pub mod router;
pub mod types;
