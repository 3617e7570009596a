//! Swarm node configuration.
//!
//! A single validated struct passed by reference at construction. Loading
//! and hierarchical merging live in `infrastructure::config`.

use serde::{Deserialize, Serialize};

use super::node::NodeRole;

/// Top-level configuration for a swarm node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Hierarchical identity; auto-generated when empty.
    pub hid: String,
    pub sid: String,
    pub node_id: String,
    /// Initial role before any election outcome applies.
    pub role: NodeRole,
    /// Capability tags advertised to the swarm.
    pub capabilities: Vec<String>,
    /// Preferred LLM model for workflow phases; empty uses the provider default.
    pub model: String,
    /// Task admission limit for this node.
    pub max_concurrent: u32,
    pub membership: MembershipConfig,
    pub election: ElectionConfig,
    pub transport: TransportConfig,
    pub workflow: WorkflowConfig,
    pub cross_hid: CrossHidConfig,
    pub failover: FailoverConfig,
    pub logging: LoggingConfig,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            hid: String::new(),
            sid: String::new(),
            node_id: String::new(),
            role: NodeRole::Worker,
            capabilities: vec!["general".to_string()],
            model: String::new(),
            max_concurrent: 4,
            membership: MembershipConfig::default(),
            election: ElectionConfig::default(),
            transport: TransportConfig::default(),
            workflow: WorkflowConfig::default(),
            cross_hid: CrossHidConfig::default(),
            failover: FailoverConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Heartbeat cadence and liveness windows.
///
/// The timeout defaults track the heartbeat interval: suspicion at 3x,
/// offline at 6x, eviction at 30x.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    pub heartbeat_interval_ms: u64,
    pub suspicion_timeout_ms: u64,
    pub offline_timeout_ms: u64,
    pub expire_timeout_ms: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 2_000,
            suspicion_timeout_ms: 6_000,
            offline_timeout_ms: 12_000,
            expire_timeout_ms: 60_000,
        }
    }
}

impl MembershipConfig {
    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Leader election cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    pub enabled: bool,
    pub election_interval_ms: u64,
    /// Cadence of the leader liveness monitor.
    pub leader_heartbeat_timeout_ms: u64,
    pub lease_duration_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            election_interval_ms: 3_000,
            leader_heartbeat_timeout_ms: 10_000,
            lease_duration_ms: 30_000,
        }
    }
}

/// Message transport selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// External broker URLs; used by deployments that inject their own
    /// transport implementation.
    pub urls: Vec<String>,
    /// Run the in-process transport instead of connecting out.
    pub embedded: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            embedded: true,
        }
    }
}

/// Workflow engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub enabled: bool,
    /// Task queue name handed to an external workflow runner, when present.
    pub task_queue: String,
    /// Model override for decompose/synthesize prompts.
    pub model: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            task_queue: "swarm-tasks".to_string(),
            model: String::new(),
        }
    }
}

/// Cross-domain bridging policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgePolicy {
    /// Admit listed peers without further checks.
    Allow,
    /// Refuse everything not explicitly listed.
    Deny,
    /// Listed peers still pass through the authorizer.
    Auth,
}

impl Default for BridgePolicy {
    fn default() -> Self {
        Self::Deny
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CrossHidConfig {
    pub default_export_policy: BridgePolicy,
    pub default_import_policy: BridgePolicy,
    /// HIDs permitted to send to this node.
    pub exported_hids: Vec<String>,
    /// HIDs this node is permitted to send to.
    pub imported_hids: Vec<String>,
}

/// Orphaned-task detection cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub enabled: bool,
    pub scan_interval_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_ms: 10_000,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty".
    pub format: String,
    /// Directory for rotated file logs; empty disables file output.
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: String::new(),
        }
    }
}
