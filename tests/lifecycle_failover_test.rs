//! Lifecycle log and failover integration tests.
//!
//! Covers the append/replay round trip on the durable stream and the full
//! orphaned-task story: a worker dies mid-task, the failover manager
//! republishes from the checkpoint, and a live worker finishes the job.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nydus::domain::models::checkpoint::{CheckpointType, TaskCheckpoint};
use nydus::domain::models::event::TaskEventType;
use nydus::domain::models::identity::NodeIdentity;
use nydus::domain::models::node::{NodeInfo, NodeRole, NodeStatus};
use nydus::domain::models::task::{SwarmTask, TaskResult, TaskStatus, TaskType};
use nydus::domain::ports::transport::Transport;
use nydus::infrastructure::transport::subjects;
use nydus::infrastructure::transport::EmbeddedTransport;
use nydus::services::{CheckpointStore, FailoverManager, LifecycleStore, MembershipService};

use common::{quick_membership_config, spawn_worker, wait_for};

#[tokio::test]
async fn test_lifecycle_round_trip_is_order_insensitive() {
    let transport: Arc<dyn Transport> = Arc::new(EmbeddedTransport::new());
    let store = LifecycleStore::new(Arc::clone(&transport), "n1");
    store.init().await.unwrap();

    let mut task = SwarmTask::new(TaskType::Direct, "general", "work");
    let mut appended = Vec::new();
    for (event_type, status) in [
        (TaskEventType::Created, TaskStatus::Pending),
        (TaskEventType::Assigned, TaskStatus::Assigned),
        (TaskEventType::Started, TaskStatus::Running),
        (TaskEventType::Progress, TaskStatus::Running),
        (TaskEventType::Completed, TaskStatus::Done),
    ] {
        task.status = status;
        let event = store.append(&task, event_type, "", None).await.unwrap();
        appended.push(event.event_id);
    }

    let history = store.get_history(&task.id).await.unwrap();
    let mut replayed: Vec<String> = history.iter().map(|e| e.event_id.clone()).collect();
    appended.sort();
    replayed.sort();
    assert_eq!(appended, replayed, "replay must return the same event multiset");
}

#[tokio::test]
async fn test_orphaned_task_is_finished_by_another_worker() {
    let raw_transport = Arc::new(EmbeddedTransport::new());
    let transport: Arc<dyn Transport> = Arc::clone(&raw_transport) as Arc<dyn Transport>;

    // Observer node hosting the failover manager.
    let identity = NodeIdentity::generate(None, None, Some("obs".to_string()));
    let membership = Arc::new(MembershipService::new(
        Arc::clone(&transport),
        identity,
        quick_membership_config(),
        NodeInfo::new("obs", NodeRole::Coordinator),
    ));
    let lifecycle = Arc::new(LifecycleStore::new(Arc::clone(&transport), "obs"));
    lifecycle.init().await.unwrap();
    let checkpoints = Arc::new(CheckpointStore::new(Arc::clone(&transport)));
    checkpoints.init().await.unwrap();
    let failover = Arc::new(FailoverManager::new(
        Arc::clone(&transport),
        Arc::clone(&membership),
        Arc::clone(&lifecycle),
        Arc::clone(&checkpoints),
        Duration::from_secs(10),
    ));

    // Doomed worker wx: announce once, then go silent with a task running.
    membership.observe(NodeInfo::new("wx", NodeRole::Worker)).await;

    let mut task = SwarmTask::new(TaskType::Direct, "general", "long analysis");
    task.assigned_to = "wx".to_string();
    task.status = TaskStatus::Running;
    let wx_store = LifecycleStore::new(Arc::clone(&transport), "wx");
    let mut metadata = HashMap::new();
    metadata.insert("task".to_string(), serde_json::to_string(&task).unwrap());
    wx_store
        .append(&task, TaskEventType::Started, "running", Some(metadata))
        .await
        .unwrap();
    checkpoints
        .save(
            &TaskCheckpoint::new(&task.id, CheckpointType::Progress, "wx")
                .with_progress(0.4)
                .with_partial_result("draft so far"),
        )
        .await
        .unwrap();

    // Healthy worker ready to pick up the retry.
    let rescuer = spawn_worker(&raw_transport, "w2", &["general"], 2).await;
    let mut results = transport
        .subscribe(&subjects::task_result(&task.id))
        .await
        .unwrap();

    // Age wx past the offline window.
    let offline = wait_for(Duration::from_secs(2), || async {
        membership.sweep().await;
        membership
            .get("wx")
            .await
            .is_some_and(|info| info.status == NodeStatus::Offline)
    })
    .await;
    assert!(offline, "wx should age out to Offline");

    let reassigned = failover.scan().await.unwrap();
    assert_eq!(reassigned, 1);

    // The rescuer finishes the republished task.
    let msg = tokio::time::timeout(Duration::from_secs(2), results.next())
        .await
        .expect("result within deadline")
        .expect("result message");
    let result: TaskResult = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(result.status, TaskStatus::Done);
    assert_eq!(result.node_id, "w2");

    // The log shows the retry referencing the dead node and checkpoint.
    let history = lifecycle.get_history(&task.id).await.unwrap();
    let retry = history
        .iter()
        .find(|e| e.event_type == TaskEventType::Retry)
        .expect("retry event");
    assert_eq!(retry.metadata.get("failed_node").map(String::as_str), Some("wx"));
    assert!(retry.metadata.contains_key("checkpoint_id"));

    // A second scan does nothing: the new owner's events are fresher.
    let again = failover.scan().await.unwrap();
    assert_eq!(again, 0, "reassignment must be idempotent");

    rescuer.stop();
    membership.stop();
}

#[tokio::test]
async fn test_delete_task_history_empties_the_stream() {
    let transport: Arc<dyn Transport> = Arc::new(EmbeddedTransport::new());
    let store = LifecycleStore::new(Arc::clone(&transport), "n1");
    store.init().await.unwrap();

    let mut task = SwarmTask::new(TaskType::Direct, "general", "ephemeral");
    store.append(&task, TaskEventType::Created, "", None).await.unwrap();
    task.status = TaskStatus::Done;
    store.append(&task, TaskEventType::Completed, "", None).await.unwrap();

    assert_eq!(store.delete_task_history(&task.id).await.unwrap(), 2);
    assert!(store.get_history(&task.id).await.unwrap().is_empty());
    assert!(store.get_active_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_checkpoint_survives_owner_death() {
    let transport: Arc<dyn Transport> = Arc::new(EmbeddedTransport::new());
    let checkpoints = CheckpointStore::new(Arc::clone(&transport));
    checkpoints.init().await.unwrap();

    let cp = TaskCheckpoint::new("t-durable", CheckpointType::PreFailover, "dying-node")
        .with_partial_result("everything important");
    checkpoints.save(&cp).await.unwrap();

    // A different store instance (another node) reads it back.
    let other = CheckpointStore::new(transport);
    let loaded = other.latest("t-durable").await.unwrap().unwrap();
    assert_eq!(loaded.partial_result, "everything important");
    assert_eq!(loaded.checkpoint_type, CheckpointType::PreFailover);
}
