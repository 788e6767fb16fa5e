//! Distributed Key-Value Store Library
//!
//! A partitioned, replicated in-memory key-value store. Every node runs the same code:
//! it holds a share of the key space, answers peers over a small binary protocol, and
//! serves clients over HTTP.
//!
//! ## Architecture Modules
//! - **`config`**: Node settings and the command line that produces them.
//! - **`membership`**: The live node set, learned from a membership oracle or by probing
//!   candidate peers, and the ring rebuild that follows every change.
//! - **`peer`**: Length-prefixed wire codec, one-shot peer client and the peer listener.
//! - **`storage`**: Consistent-hash ring, local store, quorum replication, request routing
//!   and the HTTP adapter.
//! - **`node`**: Wires one node's components together and runs them until shutdown.

pub mod config;
pub mod membership;
pub mod node;
pub mod peer;
pub mod storage;
