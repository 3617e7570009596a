//! Swarm services.

pub mod bridge;
pub mod checkpoint_store;
pub mod coordinator;
pub mod dag_executor;
pub mod discovery;
pub mod election;
pub mod failover;
pub mod lifecycle;
pub mod membership;
pub mod node;
pub mod role_switcher;
pub mod worker;
pub mod workflow_engine;

pub use bridge::CrossHidBridge;
pub use checkpoint_store::CheckpointStore;
pub use coordinator::Coordinator;
pub use dag_executor::{DagExecutionResults, DagExecutor};
pub use discovery::DiscoveryService;
pub use election::{ElectionService, LeaderChange};
pub use failover::FailoverManager;
pub use lifecycle::LifecycleStore;
pub use membership::{MembershipService, MembershipStats};
pub use node::{NodeDeps, SwarmNode};
pub use role_switcher::RoleSwitcher;
pub use worker::WorkerService;
pub use workflow_engine::{SubtaskExecutor, WorkflowEngine};
