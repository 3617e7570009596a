//! Role switcher: reconciles running components with the desired role.
//!
//! Consumes leader-change events and applies the mapping: the leader runs
//! the coordinator, everyone else runs their configured worker flavor.
//! Reconciliation is idempotent; a failed transition leaves the previous
//! role in place, safe to retry on the next change event.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::domain::error::SwarmResult;
use crate::domain::models::node::NodeRole;
use crate::domain::ports::agent::AgentRuntime;
use crate::domain::ports::bus::MessageBus;
use crate::domain::ports::transport::Transport;
use crate::services::coordinator::Coordinator;
use crate::services::election::LeaderChange;
use crate::services::lifecycle::LifecycleStore;
use crate::services::membership::MembershipService;
use crate::services::worker::{capabilities_for_role, WorkerService};

/// Builds and tears down role-bound components.
pub struct RoleSwitcher {
    transport: Arc<dyn Transport>,
    agent: Arc<dyn AgentRuntime>,
    lifecycle: Arc<LifecycleStore>,
    membership: Arc<MembershipService>,
    coordinator: Arc<Coordinator>,
    bus: Arc<dyn MessageBus>,
    /// Role from configuration, applied when this node is not the leader.
    configured_role: NodeRole,
    declared_capabilities: Vec<String>,
    max_tasks: u32,
    current_role: Mutex<Option<NodeRole>>,
    active_worker: Mutex<Option<Arc<WorkerService>>>,
    shutdown: watch::Sender<bool>,
}

impl RoleSwitcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        agent: Arc<dyn AgentRuntime>,
        lifecycle: Arc<LifecycleStore>,
        membership: Arc<MembershipService>,
        coordinator: Arc<Coordinator>,
        bus: Arc<dyn MessageBus>,
        configured_role: NodeRole,
        declared_capabilities: Vec<String>,
        max_tasks: u32,
    ) -> Self {
        Self {
            transport,
            agent,
            lifecycle,
            membership,
            coordinator,
            bus,
            configured_role,
            declared_capabilities,
            max_tasks,
            current_role: Mutex::new(None),
            active_worker: Mutex::new(None),
            shutdown: watch::channel(false).0,
        }
    }

    /// Consume leader changes and reconcile after each one.
    pub fn watch_changes(
        self: &Arc<Self>,
        mut changes: tokio::sync::mpsc::Receiver<LeaderChange>,
    ) {
        let switcher = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = changes.recv() => {
                        let Some(change) = change else { break };
                        let desired = switcher.desired_role(&change.leader);
                        if let Err(err) = switcher.apply(desired).await {
                            warn!(%err, role = %desired, "role transition failed; keeping previous role");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    /// Stop the watcher and whatever role components are active.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        self.coordinator.stop();
        if let Some(worker) = self.active_worker.lock().await.take() {
            worker.stop();
        }
        *self.current_role.lock().await = None;
    }

    /// The role this node should run given the current leader.
    fn desired_role(&self, leader: &str) -> NodeRole {
        if leader == self.membership.node_id() {
            NodeRole::Coordinator
        } else if self.configured_role == NodeRole::Coordinator {
            // Lost leadership: fall back to serving the general queue.
            NodeRole::Worker
        } else {
            self.configured_role
        }
    }

    pub async fn current_role(&self) -> Option<NodeRole> {
        *self.current_role.lock().await
    }

    /// Reconcile components with the desired role. Reapplying the current
    /// role is a no-op.
    pub async fn apply(&self, role: NodeRole) -> SwarmResult<()> {
        {
            let current = self.current_role.lock().await;
            if *current == Some(role) {
                return Ok(());
            }
        }
        info!(role = %role, "switching role");

        // Start the new role's components first; only then stop the old
        // ones and commit, so a failed start leaves the old role running.
        match role {
            NodeRole::Coordinator => {
                self.coordinator.start(Arc::clone(&self.bus));
                if let Some(worker) = self.active_worker.lock().await.take() {
                    worker.stop();
                }
            }
            NodeRole::Worker | NodeRole::Specialist => {
                let capabilities = capabilities_for_role(role, &self.declared_capabilities);
                let worker = Arc::new(WorkerService::new(
                    Arc::clone(&self.transport),
                    Arc::clone(&self.agent),
                    Arc::clone(&self.lifecycle),
                    Arc::clone(&self.membership),
                    capabilities,
                    self.max_tasks,
                ));
                worker.start().await?;
                self.coordinator.stop();
                if let Some(previous) = self.active_worker.lock().await.replace(worker) {
                    previous.stop();
                }
            }
        }

        self.membership.set_role(role).await;
        *self.current_role.lock().await = Some(role);
        Ok(())
    }
}
