//! Task lifecycle events.
//!
//! Events are append-only entries on the durable `TASKS` stream, one
//! subject per task. Delivery is at-least-once; consumers dedupe on
//! `event_id` and treat terminal events as absorbing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{SwarmTask, TaskStatus};

/// What happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventType {
    Created,
    Assigned,
    Started,
    Progress,
    Completed,
    Failed,
    Retry,
    Checkpoint,
}

impl TaskEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Assigned => "assigned",
            Self::Started => "started",
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retry => "retry",
            Self::Checkpoint => "checkpoint",
        }
    }
}

impl std::fmt::Display for TaskEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in a task's lifecycle log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event_id: String,
    pub task_id: String,
    pub event_type: TaskEventType,
    pub timestamp: DateTime<Utc>,
    /// Node that recorded the event.
    pub node_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub message: String,
    /// Completion ratio in [0, 1]; meaningful for Progress events.
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TaskEvent {
    /// Build an event from a task's current state.
    pub fn for_task(
        task: &SwarmTask,
        event_type: TaskEventType,
        node_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            event_type,
            timestamp: Utc::now(),
            node_id: node_id.into(),
            status: task.status,
            message: message.into(),
            progress: 0.0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress.clamp(0.0, 1.0);
        self
    }

    /// Whether this event closes the task's lifecycle.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
