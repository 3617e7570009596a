//! External workflow runner port.
//!
//! Deployments with a workflow service (deterministic replay, timer-based
//! retries) plug it in here. When absent or unhealthy, the coordinator
//! degrades to the in-process workflow engine.

use async_trait::async_trait;

use crate::domain::error::SwarmError;
use crate::domain::models::task::{SwarmTask, TaskResult};

/// An external workflow execution service.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    /// Whether the service is reachable right now.
    async fn is_healthy(&self) -> bool;

    /// Start a workflow for the task and await its result.
    async fn run(&self, task: &SwarmTask) -> Result<TaskResult, SwarmError>;
}
