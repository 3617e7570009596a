//! Failover manager: reassigns tasks orphaned by dead nodes.
//!
//! Periodically scans offline members for tasks whose latest lifecycle
//! event they recorded and that never reached a terminal status, then
//! republishes each with its newest checkpoint attached. Tasks already
//! claimed by a new owner fold to that owner's events and drop out of the
//! scan, which keeps the pass idempotent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::domain::error::SwarmResult;
use crate::domain::models::event::TaskEventType;
use crate::domain::models::task::{SwarmTask, TaskStatus};
use crate::domain::ports::transport::Transport;
use crate::infrastructure::transport::subjects;
use crate::services::checkpoint_store::CheckpointStore;
use crate::services::lifecycle::LifecycleStore;
use crate::services::membership::MembershipService;

/// Detects and reassigns orphaned tasks.
pub struct FailoverManager {
    transport: Arc<dyn Transport>,
    membership: Arc<MembershipService>,
    lifecycle: Arc<LifecycleStore>,
    checkpoints: Arc<CheckpointStore>,
    scan_interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl FailoverManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        membership: Arc<MembershipService>,
        lifecycle: Arc<LifecycleStore>,
        checkpoints: Arc<CheckpointStore>,
        scan_interval: Duration,
    ) -> Self {
        Self {
            transport,
            membership,
            lifecycle,
            checkpoints,
            scan_interval,
            shutdown: watch::channel(false).0,
        }
    }

    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(manager.scan_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(err) = manager.scan().await {
                            warn!(%err, "failover scan failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// One scan pass. Returns how many tasks were reassigned.
    pub async fn scan(&self) -> SwarmResult<usize> {
        let mut reassigned = 0;
        for node in self.membership.offline_members().await {
            let orphans = self.lifecycle.get_tasks_by_node(&node.node_id).await?;
            for event in orphans {
                if event.status.is_terminal() {
                    continue;
                }
                match self.reassign(&event.task_id, &node.node_id).await {
                    Ok(true) => reassigned += 1,
                    Ok(false) => {}
                    Err(err) => {
                        warn!(%err, task_id = %event.task_id, "failed to reassign orphan");
                    }
                }
            }
        }
        Ok(reassigned)
    }

    /// Republish one orphaned task from its latest checkpoint.
    async fn reassign(&self, task_id: &str, failed_node: &str) -> SwarmResult<bool> {
        let Some(mut task) = self.recover_task(task_id).await? else {
            warn!(task_id, "orphan has no recoverable task payload; skipping");
            return Ok(false);
        };

        let checkpoint = self.checkpoints.latest(task_id).await?;

        task.assigned_to.clear();
        task.status = TaskStatus::Pending;
        if let Some(cp) = &checkpoint {
            task.context.insert(
                "checkpoint_id".to_string(),
                serde_json::Value::String(cp.checkpoint_id.clone()),
            );
            task.context.insert(
                "resume_state".to_string(),
                serde_json::to_value(&cp.state)?,
            );
            if !cp.partial_result.is_empty() {
                task.context.insert(
                    "partial_result".to_string(),
                    serde_json::Value::String(cp.partial_result.clone()),
                );
            }
        }

        let mut metadata = HashMap::new();
        metadata.insert("failed_node".to_string(), failed_node.to_string());
        metadata.insert("task".to_string(), serde_json::to_string(&task)?);
        if let Some(cp) = &checkpoint {
            metadata.insert("checkpoint_id".to_string(), cp.checkpoint_id.clone());
        }
        self.lifecycle
            .append(&task, TaskEventType::Retry, "reassigned after node failure", Some(metadata))
            .await?;

        self.transport
            .publish(
                &subjects::task_dispatch(&task.capability),
                serde_json::to_vec(&task)?,
            )
            .await?;

        info!(task_id, failed_node, from_checkpoint = checkpoint.is_some(), "orphan reassigned");
        Ok(true)
    }

    /// Reconstruct the task from the serialized copy riding on its events.
    async fn recover_task(&self, task_id: &str) -> SwarmResult<Option<SwarmTask>> {
        let mut history = self.lifecycle.get_history(task_id).await?;
        history.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        for event in history.iter().rev() {
            if let Some(raw) = event.metadata.get("task") {
                match serde_json::from_str::<SwarmTask>(raw) {
                    Ok(task) => return Ok(Some(task)),
                    Err(err) => warn!(%err, task_id, "undecodable task payload on event"),
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::checkpoint::{CheckpointType, TaskCheckpoint};
    use crate::domain::models::config::MembershipConfig;
    use crate::domain::models::identity::NodeIdentity;
    use crate::domain::models::node::{NodeInfo, NodeRole, NodeStatus};
    use crate::domain::models::task::TaskType;
    use crate::infrastructure::transport::EmbeddedTransport;

    struct Fixture {
        transport: Arc<dyn Transport>,
        membership: Arc<MembershipService>,
        lifecycle: Arc<LifecycleStore>,
        manager: Arc<FailoverManager>,
    }

    async fn fixture() -> Fixture {
        let transport: Arc<dyn Transport> = Arc::new(EmbeddedTransport::new());
        let identity = NodeIdentity::generate(None, None, Some("f1".to_string()));
        let membership = Arc::new(MembershipService::new(
            Arc::clone(&transport),
            identity,
            MembershipConfig::default(),
            NodeInfo::new("f1", NodeRole::Coordinator),
        ));
        let lifecycle = Arc::new(LifecycleStore::new(Arc::clone(&transport), "f1"));
        lifecycle.init().await.unwrap();
        let checkpoints = Arc::new(CheckpointStore::new(Arc::clone(&transport)));
        checkpoints.init().await.unwrap();
        let manager = Arc::new(FailoverManager::new(
            Arc::clone(&transport),
            Arc::clone(&membership),
            Arc::clone(&lifecycle),
            Arc::clone(&checkpoints),
            Duration::from_secs(10),
        ));
        Fixture {
            transport,
            membership,
            lifecycle,
            manager,
        }
    }

    async fn offline_node(membership: &MembershipService, node_id: &str) {
        let mut info = NodeInfo::new(node_id, NodeRole::Worker);
        info.status = NodeStatus::Offline;
        membership.observe(info).await;
    }

    /// Record a task as running on `node_id`, with the payload attached.
    async fn running_task(fixture: &Fixture, node_id: &str) -> SwarmTask {
        let mut task = SwarmTask::new(TaskType::Direct, "general", "interrupted work");
        task.assigned_to = node_id.to_string();
        task.status = TaskStatus::Running;
        let store = LifecycleStore::new(Arc::clone(&fixture.transport), node_id);
        let mut metadata = HashMap::new();
        metadata.insert("task".to_string(), serde_json::to_string(&task).unwrap());
        store
            .append(&task, TaskEventType::Started, "running", Some(metadata))
            .await
            .unwrap();
        task
    }

    #[tokio::test]
    async fn test_orphan_is_republished_with_cleared_assignee() {
        let fixture = fixture().await;
        offline_node(&fixture.membership, "wx").await;
        let task = running_task(&fixture, "wx").await;

        let mut dispatch = fixture
            .transport
            .subscribe(&subjects::task_dispatch("general"))
            .await
            .unwrap();

        let reassigned = fixture.manager.scan().await.unwrap();
        assert_eq!(reassigned, 1);

        let msg = dispatch.try_next().expect("republished task");
        let republished: SwarmTask = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(republished.id, task.id);
        assert!(republished.assigned_to.is_empty());
        assert_eq!(republished.status, TaskStatus::Pending);

        // Retry event references the failed node.
        let history = fixture.lifecycle.get_history(&task.id).await.unwrap();
        let retry = history
            .iter()
            .find(|e| e.event_type == TaskEventType::Retry)
            .expect("retry event");
        assert_eq!(retry.metadata.get("failed_node").unwrap(), "wx");
    }

    #[tokio::test]
    async fn test_checkpoint_rides_on_reassignment() {
        let fixture = fixture().await;
        offline_node(&fixture.membership, "wx").await;
        let task = running_task(&fixture, "wx").await;

        let checkpoints = CheckpointStore::new(Arc::clone(&fixture.transport));
        let cp = TaskCheckpoint::new(&task.id, CheckpointType::PreFailover, "wx")
            .with_progress(0.6)
            .with_partial_result("half the answer");
        checkpoints.save(&cp).await.unwrap();

        let mut dispatch = fixture
            .transport
            .subscribe(&subjects::task_dispatch("general"))
            .await
            .unwrap();
        fixture.manager.scan().await.unwrap();

        let msg = dispatch.try_next().expect("republished task");
        let republished: SwarmTask = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(
            republished.context.get("checkpoint_id"),
            Some(&serde_json::Value::String(cp.checkpoint_id.clone()))
        );
        assert_eq!(
            republished.context.get("partial_result"),
            Some(&serde_json::Value::String("half the answer".to_string()))
        );
    }

    #[tokio::test]
    async fn test_terminal_tasks_are_not_reassigned() {
        let fixture = fixture().await;
        offline_node(&fixture.membership, "wx").await;
        let mut task = running_task(&fixture, "wx").await;

        // The task completed before the node died.
        task.status = TaskStatus::Done;
        let store = LifecycleStore::new(Arc::clone(&fixture.transport), "wx");
        store
            .append(&task, TaskEventType::Completed, "done", None)
            .await
            .unwrap();

        assert_eq!(fixture.manager.scan().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_task_claimed_by_new_owner_is_skipped() {
        let fixture = fixture().await;
        offline_node(&fixture.membership, "wx").await;
        let mut task = running_task(&fixture, "wx").await;

        // Another worker already claimed the task; its events are newer.
        task.assigned_to = "wy".to_string();
        task.status = TaskStatus::Assigned;
        let store = LifecycleStore::new(Arc::clone(&fixture.transport), "wy");
        store
            .append(&task, TaskEventType::Assigned, "claimed", None)
            .await
            .unwrap();

        assert_eq!(fixture.manager.scan().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_healthy_nodes_are_not_scanned() {
        let fixture = fixture().await;
        fixture
            .membership
            .observe(NodeInfo::new("wy", NodeRole::Worker))
            .await;
        running_task(&fixture, "wy").await;
        assert_eq!(fixture.manager.scan().await.unwrap(), 0);
    }
}
