//! Swarm node: assembles and supervises every subsystem.
//!
//! Construction wires the ports and services together; `start` brings the
//! stack up in dependency order and `stop` tears it down in reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::error::SwarmResult;
use crate::domain::models::config::SwarmConfig;
use crate::domain::models::identity::NodeIdentity;
use crate::domain::models::node::{NodeInfo, NodeRole};
use crate::domain::ports::agent::AgentRuntime;
use crate::domain::ports::authorizer::Authorizer;
use crate::domain::ports::bus::MessageBus;
use crate::domain::ports::chat::{resolve_model, ChatProvider};
use crate::domain::ports::transport::Transport;
use crate::domain::ports::workflow::WorkflowRunner;
use crate::services::bridge::CrossHidBridge;
use crate::services::checkpoint_store::CheckpointStore;
use crate::services::coordinator::Coordinator;
use crate::services::discovery::DiscoveryService;
use crate::services::election::ElectionService;
use crate::services::failover::FailoverManager;
use crate::services::lifecycle::LifecycleStore;
use crate::services::membership::{MembershipService, MembershipStats};
use crate::services::role_switcher::RoleSwitcher;

/// External collaborators injected at construction.
pub struct NodeDeps {
    pub transport: Arc<dyn Transport>,
    pub agent: Arc<dyn AgentRuntime>,
    pub chat: Arc<dyn ChatProvider>,
    pub bus: Arc<dyn MessageBus>,
    pub workflow_runner: Option<Arc<dyn WorkflowRunner>>,
    pub authorizer: Option<Arc<dyn Authorizer>>,
}

/// The root manager for one swarm node.
pub struct SwarmNode {
    identity: NodeIdentity,
    transport: Arc<dyn Transport>,
    membership: Arc<MembershipService>,
    election: Arc<ElectionService>,
    role_switcher: Arc<RoleSwitcher>,
    failover: Arc<FailoverManager>,
    bridge: Arc<CrossHidBridge>,
    lifecycle: Arc<LifecycleStore>,
    agent: Arc<dyn AgentRuntime>,
    configured_role: NodeRole,
    election_enabled: bool,
    failover_enabled: bool,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl SwarmNode {
    /// Wire up every subsystem from configuration and collaborators.
    pub async fn build(config: &SwarmConfig, deps: NodeDeps) -> SwarmResult<Arc<Self>> {
        let identity = NodeIdentity::generate(
            Some(config.hid.clone()),
            Some(config.sid.clone()),
            Some(config.node_id.clone()),
        );
        deps.agent.set_identity(&identity.hid, &identity.sid).await;

        let mut self_info = NodeInfo::new(&identity.node_id, config.role);
        self_info.capabilities.clone_from(&config.capabilities);
        self_info.max_tasks = config.max_concurrent;

        let membership = Arc::new(MembershipService::new(
            Arc::clone(&deps.transport),
            identity.clone(),
            config.membership.clone(),
            self_info,
        ));
        let discovery = Arc::new(DiscoveryService::new(Arc::clone(&membership)));
        let lifecycle = Arc::new(LifecycleStore::new(
            Arc::clone(&deps.transport),
            identity.node_id.clone(),
        ));
        let checkpoints = Arc::new(CheckpointStore::new(Arc::clone(&deps.transport)));

        let model = resolve_model(
            if config.workflow.model.is_empty() {
                &config.model
            } else {
                &config.workflow.model
            },
            deps.chat.as_ref(),
        );
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&deps.transport),
            Arc::clone(&membership),
            Arc::clone(&discovery),
            Arc::clone(&lifecycle),
            Arc::clone(&deps.agent),
            Arc::clone(&deps.chat),
            deps.workflow_runner.clone(),
            config.workflow.enabled,
            model,
        ));

        let role_switcher = Arc::new(RoleSwitcher::new(
            Arc::clone(&deps.transport),
            Arc::clone(&deps.agent),
            Arc::clone(&lifecycle),
            Arc::clone(&membership),
            coordinator,
            Arc::clone(&deps.bus),
            config.role,
            config.capabilities.clone(),
            config.max_concurrent,
        ));

        let election = Arc::new(ElectionService::new(
            Arc::clone(&deps.transport),
            Arc::clone(&membership),
            config.election.clone(),
        ));

        let failover = Arc::new(FailoverManager::new(
            Arc::clone(&deps.transport),
            Arc::clone(&membership),
            Arc::clone(&lifecycle),
            Arc::clone(&checkpoints),
            Duration::from_millis(config.failover.scan_interval_ms),
        ));

        let bridge = Arc::new(CrossHidBridge::new(
            Arc::clone(&deps.transport),
            identity.hid.clone(),
            identity.sid.clone(),
            &config.cross_hid,
            deps.authorizer.clone(),
        ));

        lifecycle.init().await?;
        checkpoints.init().await?;

        Ok(Arc::new(Self {
            identity,
            transport: deps.transport,
            membership,
            election,
            role_switcher,
            failover,
            bridge,
            lifecycle,
            agent: deps.agent,
            configured_role: config.role,
            election_enabled: config.election.enabled,
            failover_enabled: config.failover.enabled,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Start every subsystem in dependency order. Idempotent.
    pub async fn start(self: &Arc<Self>) -> SwarmResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(identity = %self.identity, "starting swarm node");

        self.membership.start().await?;

        // The configured role runs until (and unless) an election says
        // otherwise.
        self.role_switcher.apply(self.configured_role).await?;

        if self.election_enabled {
            if let Some(changes) = self.election.changes().await {
                self.role_switcher.watch_changes(changes);
            }
            self.election.start();
        }

        if self.failover_enabled {
            self.failover.start();
        }

        let mut bridged = self.bridge.start().await?;
        let agent = Arc::clone(&self.agent);
        tokio::spawn(async move {
            while let Some(msg) = bridged.recv().await {
                let prompt = String::from_utf8_lossy(&msg.payload).to_string();
                let session_key = format!("xhid:{}", msg.from_hid);
                if let Err(err) = agent.process_direct(&prompt, &session_key).await {
                    warn!(%err, from = %msg.from_hid, "bridged message processing failed");
                }
            }
        });

        info!(node_id = %self.identity.node_id, "swarm node started");
        Ok(())
    }

    /// Stop components in reverse dependency order. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(node_id = %self.identity.node_id, "stopping swarm node");

        // Stop taking new work first, then the control loops, then the
        // substrate they all share.
        self.role_switcher.stop().await;
        self.election.stop();
        self.failover.stop();
        self.bridge.stop();
        self.membership.stop();
        if let Err(err) = self.transport.close().await {
            warn!(%err, "transport close failed");
        }
    }

    /// Advertise Draining so peers stop selecting this node.
    pub async fn drain(&self) {
        self.membership.drain().await;
    }

    /// Block until this node's view has a leader.
    pub async fn elect_leader(&self, deadline: Duration) -> SwarmResult<String> {
        self.election.elect_leader(deadline).await
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub async fn leader(&self) -> Option<String> {
        self.election.leader().await
    }

    pub async fn is_leader(&self) -> bool {
        self.election.is_leader().await
    }

    pub async fn current_role(&self) -> Option<NodeRole> {
        self.role_switcher.current_role().await
    }

    pub async fn membership_stats(&self) -> MembershipStats {
        self.membership.stats().await
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleStore> {
        &self.lifecycle
    }

    pub fn bridge(&self) -> &Arc<CrossHidBridge> {
        &self.bridge
    }
}
