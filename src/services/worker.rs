//! Worker service: drains dispatch subjects and executes tasks.
//!
//! One queue-group consumer per served capability, so each published task
//! reaches exactly one worker. Admission is a semaphore sized to the
//! node's task limit; the membership snapshot advertises the resulting
//! load through its heartbeats.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::domain::error::SwarmResult;
use crate::domain::models::event::TaskEventType;
use crate::domain::models::node::NodeRole;
use crate::domain::models::task::{SwarmTask, TaskResult, TaskStatus};
use crate::domain::ports::agent::AgentRuntime;
use crate::domain::ports::transport::Transport;
use crate::infrastructure::transport::subjects;
use crate::services::lifecycle::LifecycleStore;
use crate::services::membership::MembershipService;

/// Which dispatch subjects a role serves.
///
/// Workers serve the general queue; specialists serve their declared
/// capability list instead.
pub fn capabilities_for_role(role: NodeRole, declared: &[String]) -> Vec<String> {
    match role {
        NodeRole::Specialist if !declared.is_empty() => declared.to_vec(),
        _ => vec!["general".to_string()],
    }
}

/// Consumes dispatch subjects and runs tasks on the local agent.
pub struct WorkerService {
    transport: Arc<dyn Transport>,
    agent: Arc<dyn AgentRuntime>,
    lifecycle: Arc<LifecycleStore>,
    membership: Arc<MembershipService>,
    capabilities: Vec<String>,
    admission: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl WorkerService {
    pub fn new(
        transport: Arc<dyn Transport>,
        agent: Arc<dyn AgentRuntime>,
        lifecycle: Arc<LifecycleStore>,
        membership: Arc<MembershipService>,
        capabilities: Vec<String>,
        max_tasks: u32,
    ) -> Self {
        Self {
            transport,
            agent,
            lifecycle,
            membership,
            capabilities,
            admission: Arc::new(Semaphore::new(max_tasks.max(1) as usize)),
            shutdown: watch::channel(false).0,
        }
    }

    /// Subscribe to every served capability subject.
    pub async fn start(self: &Arc<Self>) -> SwarmResult<()> {
        for capability in self.capabilities.clone() {
            let mut sub = self
                .transport
                .queue_subscribe(
                    &subjects::task_dispatch(&capability),
                    &subjects::dispatch_group(&capability),
                )
                .await?;
            info!(capability, "worker consuming dispatch subject");

            let worker = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = sub.next() => {
                            let Some(msg) = msg else { break };
                            match serde_json::from_slice::<SwarmTask>(&msg.payload) {
                                Ok(task) => {
                                    let runner = Arc::clone(&worker);
                                    tokio::spawn(async move { runner.run_task(task).await });
                                }
                                Err(err) => warn!(%err, "dropping undecodable task"),
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            });
        }
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Execute one task end to end, publishing lifecycle events and the
    /// result. Never propagates: failures become Failed events + results.
    async fn run_task(self: Arc<Self>, mut task: SwarmTask) {
        let Ok(_permit) = Arc::clone(&self.admission).acquire_owned().await else {
            return;
        };
        let node_id = self.membership.node_id().to_string();
        self.membership.task_started().await;

        task.assigned_to.clone_from(&node_id);
        task.status = TaskStatus::Assigned;
        if let Err(err) = self
            .lifecycle
            .append(&task, TaskEventType::Assigned, "claimed by worker", None)
            .await
        {
            warn!(%err, task_id = %task.id, "failed to record assignment");
        }

        task.status = TaskStatus::Running;
        if let Err(err) = self
            .lifecycle
            .append(&task, TaskEventType::Started, "execution started", None)
            .await
        {
            warn!(%err, task_id = %task.id, "failed to record start");
        }

        let session_key = format!("swarm:{}", task.id);
        let outcome = self.agent.process_direct(&task.prompt, &session_key).await;

        let result = match outcome {
            Ok(output) => {
                task.status = TaskStatus::Done;
                task.completed_at = Some(chrono::Utc::now());
                if let Err(err) = self
                    .lifecycle
                    .append(&task, TaskEventType::Completed, "execution completed", None)
                    .await
                {
                    warn!(%err, task_id = %task.id, "failed to record completion");
                }
                // Per-node attribution for downstream synthesis.
                let attributed = format!("=== {node_id} ===\n{output}");
                TaskResult::done(&task.id, &node_id, attributed)
            }
            Err(err) => {
                error!(%err, task_id = %task.id, "task execution failed");
                task.status = TaskStatus::Failed;
                task.completed_at = Some(chrono::Utc::now());
                if let Err(append_err) = self
                    .lifecycle
                    .append(&task, TaskEventType::Failed, err.to_string(), None)
                    .await
                {
                    warn!(%append_err, task_id = %task.id, "failed to record failure");
                }
                TaskResult::failed(&task.id, err.to_string())
            }
        };

        match serde_json::to_vec(&result) {
            Ok(payload) => {
                if let Err(err) = self
                    .transport
                    .publish(&subjects::task_result(&task.id), payload)
                    .await
                {
                    warn!(%err, task_id = %task.id, "failed to publish result");
                }
            }
            Err(err) => warn!(%err, task_id = %task.id, "failed to encode result"),
        }

        self.membership.task_finished().await;
    }
}
