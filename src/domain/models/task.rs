//! Swarm task domain model.
//!
//! A task is created at its coordinator, which owns its pending state until
//! dispatch. Once published, the assigned node owns it until completion or
//! until failover transfers ownership.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default task timeout when none is configured.
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// How a task is routed through the swarm.
///
/// A tagged union: dispatch logic switches per variant, there is no
/// inheritance-style hierarchy behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Point-to-point: select one worker (or run locally) and await.
    Direct,
    /// Decompose, fan out, and synthesize via the workflow engine.
    Workflow,
    /// Publish to the capability subject; the queue group picks a winner.
    Broadcast,
}

impl Default for TaskType {
    fn default() -> Self {
        Self::Direct
    }
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Workflow => "workflow",
            Self::Broadcast => "broadcast",
        }
    }
}

/// Priority tier for dispatch and selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Map a raw wire value onto the tier range, clamping overflow to High.
    pub fn from_wire(value: i64) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Normal,
            2 => Self::High,
            3 => Self::Critical,
            v if v > 3 => Self::High,
            _ => Self::Low,
        }
    }
}

/// Status of a task in the dispatch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet handed to a node.
    Pending,
    /// Bound to a node, not yet started.
    Assigned,
    /// Executing on its owner.
    Running,
    /// Finished successfully. Terminal.
    Done,
    /// Finished with an error. Terminal.
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Terminal statuses are monotonic: once reached, never left.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work dispatched through the swarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmTask {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub priority: TaskPriority,
    /// Capability tag the executing node must advertise.
    pub capability: String,
    pub prompt: String,
    /// Free-form context handed to the executing agent.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Node id of the current owner; empty until dispatch.
    #[serde(default)]
    pub assigned_to: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timeout_ms: u64,
}

impl SwarmTask {
    pub fn new(task_type: TaskType, capability: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            workflow_id: None,
            task_type,
            priority: TaskPriority::Normal,
            capability: capability.into(),
            prompt: prompt.into(),
            context: HashMap::new(),
            assigned_to: String::new(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            timeout_ms: DEFAULT_TASK_TIMEOUT_MS,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Effective timeout: a zero value falls back to the 10 minute default.
    pub fn effective_timeout(&self) -> std::time::Duration {
        let ms = if self.timeout_ms == 0 {
            DEFAULT_TASK_TIMEOUT_MS
        } else {
            self.timeout_ms
        };
        std::time::Duration::from_millis(ms)
    }
}

/// Outcome of a dispatched task, surfaced to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    /// Node that produced the result; empty for local execution failures.
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn done(task_id: impl Into<String>, node_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Done,
            node_id: node_id.into(),
            output: output.into(),
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            node_id: String::new(),
            output: String::new(),
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Done
    }
}
