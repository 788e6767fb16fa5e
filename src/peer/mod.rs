//! Peer Messaging Module
//!
//! Binary request/response traffic between nodes: liveness probes, forwarded client
//! operations and replication.
//!
//! ## Layers
//! - **`protocol`**: Frame codec and message type registry.
//! - **`client`**: One connection per request, bounded by connect and response timeouts.
//! - **`server`**: Accept loop plus the dispatcher mapping each request type to a reply.

pub mod client;
pub mod protocol;
pub mod server;
