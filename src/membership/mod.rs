//! Membership & Discovery Module
//!
//! Tracks which nodes are live and keeps the hash ring in step with that view.
//!
//! ## Strategies
//! - **Oracle**: Nodes register an ephemeral record with a shared coordination service and
//!   re-list the live set on every change notification.
//! - **Probing**: Nodes PING a fixed candidate list on an interval and treat whoever
//!   answers with PONG as live.
//!
//! Both end in `MembershipService::apply`, which swaps in a new snapshot and rebuilds the ring.

pub mod oracle;
pub mod prober;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
