//! Task checkpoints.
//!
//! A checkpoint is the persisted partial state of a running task,
//! sufficient to resume it on another node after failover. The `state` and
//! `context` payloads are opaque to the core; the agent collaborator owns
//! their shape via its capture and restore hooks.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a checkpoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    /// Periodic progress snapshot.
    Progress,
    /// A named stage boundary.
    Milestone,
    /// Taken when the owner anticipates going away.
    PreFailover,
    /// Explicitly requested.
    User,
}

impl CheckpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Milestone => "milestone",
            Self::PreFailover => "pre_failover",
            Self::User => "user",
        }
    }
}

/// Persisted resumable state of a running task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCheckpoint {
    pub checkpoint_id: String,
    pub task_id: String,
    #[serde(rename = "type")]
    pub checkpoint_type: CheckpointType,
    /// Node that took the checkpoint.
    pub node_id: String,
    pub created_at: DateTime<Utc>,
    /// Completion ratio in [0, 1] at checkpoint time.
    #[serde(default)]
    pub progress: f64,
    /// Opaque resumable state, owned by the agent collaborator.
    #[serde(default)]
    pub state: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub partial_result: String,
    /// Opaque task context snapshot.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl TaskCheckpoint {
    pub fn new(
        task_id: impl Into<String>,
        checkpoint_type: CheckpointType,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            checkpoint_type,
            node_id: node_id.into(),
            created_at: Utc::now(),
            progress: 0.0,
            state: HashMap::new(),
            partial_result: String::new(),
            context: HashMap::new(),
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress.clamp(0.0, 1.0);
        self
    }

    pub fn with_partial_result(mut self, partial: impl Into<String>) -> Self {
        self.partial_result = partial.into();
        self
    }
}
