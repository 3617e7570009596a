//! Gossip-replicated node state.
//!
//! Each node owns its own `NodeInfo` and broadcasts snapshots via announce
//! and heartbeat messages. Observers hold read-only cached copies that age
//! out by the membership timeouts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a node plays in the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Dispatches inbound tasks to the swarm.
    Coordinator,
    /// Executes general tasks.
    Worker,
    /// Executes capability-filtered tasks.
    Specialist,
}

impl Default for NodeRole {
    fn default() -> Self {
        Self::Worker
    }
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Worker => "worker",
            Self::Specialist => "specialist",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "coordinator" => Some(Self::Coordinator),
            "worker" => Some(Self::Worker),
            "specialist" => Some(Self::Specialist),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Liveness / availability status of a node as seen by an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Heartbeating within the suspicion window.
    Online,
    /// Online but at or near its task admission limit.
    Busy,
    /// Missed heartbeats beyond the offline window; eligible for failover.
    Offline,
    /// Missed heartbeats beyond the suspicion window.
    Suspicious,
    /// Shutting down gracefully; not selectable, still heartbeating.
    Draining,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::Online
    }
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Suspicious => "suspicious",
            Self::Draining => "draining",
        }
    }

    /// Whether a node in this status can be handed new work.
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Online | Self::Busy)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a node's state, replicated via gossip.
///
/// Every field is authoritative at the origin node. `last_seen` is the
/// exception: it is stamped by the observer at receipt time and never
/// travels on the wire as a liveness signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub role: NodeRole,
    pub status: NodeStatus,
    /// Capability tags this node advertises, e.g. "code", "research".
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Load factor in [0, 1], tracking tasks_running / max_tasks.
    #[serde(default)]
    pub load: f64,
    #[serde(default)]
    pub tasks_running: u32,
    #[serde(default)]
    pub max_tasks: u32,
    pub started_at: DateTime<Utc>,
    /// Observer-local receipt time of the freshest heartbeat.
    pub last_seen: DateTime<Utc>,
    /// Carries hid/sid for cross-domain routing, plus free-form tags.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl NodeInfo {
    pub fn new(node_id: impl Into<String>, role: NodeRole) -> Self {
        let now = Utc::now();
        Self {
            node_id: node_id.into(),
            role,
            status: NodeStatus::Online,
            capabilities: vec!["general".to_string()],
            load: 0.0,
            tasks_running: 0,
            max_tasks: 1,
            started_at: now,
            last_seen: now,
            metadata: HashMap::new(),
        }
    }

    /// Whether this node advertises the given capability.
    ///
    /// Every node serves "general" regardless of its advertised tags.
    pub fn has_capability(&self, capability: &str) -> bool {
        capability == "general" || self.capabilities.iter().any(|c| c == capability)
    }

    /// Whether this node can admit another task.
    pub fn has_slack(&self) -> bool {
        self.tasks_running < self.max_tasks
    }

    /// Recompute the load factor from the running/max counters.
    pub fn recompute_load(&mut self) {
        self.load = if self.max_tasks == 0 {
            1.0
        } else {
            f64::from(self.tasks_running) / f64::from(self.max_tasks)
        };
    }

    pub fn hid(&self) -> Option<&str> {
        self.metadata.get("hid").map(String::as_str)
    }

    pub fn sid(&self) -> Option<&str> {
        self.metadata.get("sid").map(String::as_str)
    }
}
