//! Nydus - distributed swarm coordination substrate
//!
//! A cluster of peer nodes that cooperatively decompose, dispatch, execute,
//! and synthesize LLM-driven tasks:
//! - Gossip membership with heartbeat-driven liveness
//! - Deterministic leader election and dynamic role switching
//! - Capability-routed task dispatch with a durable lifecycle log
//! - Checkpointed failover for tasks orphaned by dead nodes
//! - Cross-domain bridging and bounded-parallel DAG execution

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export the assembly surface for embedders.
pub use domain::models::config::SwarmConfig;
pub use infrastructure::transport::EmbeddedTransport;
pub use services::{NodeDeps, SwarmNode};
