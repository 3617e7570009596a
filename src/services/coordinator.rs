//! Coordinator: inbound entry point and task dispatch.
//!
//! Inbound messages are scanned for decomposition hints; plain requests go
//! straight to the local agent, composite ones become workflow tasks. Task
//! dispatch is per-variant: Direct selects a worker (falling back to local
//! execution), Workflow runs the external runner or the in-process engine,
//! Broadcast lets the capability queue group race for the task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::models::event::TaskEventType;
use crate::domain::models::task::{SwarmTask, TaskPriority, TaskResult, TaskStatus, TaskType};
use crate::domain::ports::agent::AgentRuntime;
use crate::domain::ports::bus::{MessageBus, OutboundMessage};
use crate::domain::ports::chat::ChatProvider;
use crate::domain::ports::transport::Transport;
use crate::domain::ports::workflow::WorkflowRunner;
use crate::infrastructure::transport::subjects;
use crate::services::discovery::DiscoveryService;
use crate::services::lifecycle::LifecycleStore;
use crate::services::membership::MembershipService;
use crate::services::workflow_engine::{SubtaskExecutor, WorkflowEngine};

/// Timeout applied to coordinator-built workflow tasks.
const WORKFLOW_TASK_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Words that mark a message as decomposable, with common CJK equivalents.
const DECOMPOSITION_HINTS: &[&str] = &[
    "parallel",
    "concurrent",
    "compare",
    "summarize",
    "并行",
    "同时",
    "比较",
    "总结",
];

/// Whether the content asks for decomposable work.
///
/// Plain lowercase + substring search; hint terms match anywhere in the
/// message.
pub fn has_decomposition_hint(content: &str) -> bool {
    let lowered = content.to_lowercase();
    DECOMPOSITION_HINTS.iter().any(|hint| lowered.contains(hint))
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<TaskResult>>>>;

/// Dispatches tasks into the swarm and collects their results.
pub struct Coordinator {
    transport: Arc<dyn Transport>,
    membership: Arc<MembershipService>,
    discovery: Arc<DiscoveryService>,
    lifecycle: Arc<LifecycleStore>,
    agent: Arc<dyn AgentRuntime>,
    chat: Arc<dyn ChatProvider>,
    workflow_runner: Option<Arc<dyn WorkflowRunner>>,
    workflow_enabled: bool,
    model: String,
    /// Result waiters keyed by task id; removed on every exit path.
    pending: PendingMap,
    shutdown: watch::Sender<bool>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        membership: Arc<MembershipService>,
        discovery: Arc<DiscoveryService>,
        lifecycle: Arc<LifecycleStore>,
        agent: Arc<dyn AgentRuntime>,
        chat: Arc<dyn ChatProvider>,
        workflow_runner: Option<Arc<dyn WorkflowRunner>>,
        workflow_enabled: bool,
        model: String,
    ) -> Self {
        Self {
            transport,
            membership,
            discovery,
            lifecycle,
            agent,
            chat,
            workflow_runner,
            workflow_enabled,
            model,
            pending: Arc::new(Mutex::new(HashMap::new())),
            shutdown: watch::channel(false).0,
        }
    }

    /// Drain the local bus until it closes or the coordinator stops.
    pub fn start(self: &Arc<Self>, bus: Arc<dyn MessageBus>) {
        let coordinator = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    inbound = bus.next_inbound() => {
                        let Some(msg) = inbound else { break };
                        let reply = coordinator
                            .handle_inbound(&msg.content, &msg.channel, &msg.chat_id)
                            .await;
                        let outbound = OutboundMessage {
                            channel: msg.channel,
                            chat_id: msg.chat_id,
                            content: reply,
                        };
                        if let Err(err) = bus.publish_outbound(outbound).await {
                            warn!(%err, "failed to publish reply");
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

    /// Analyze one inbound message and produce the reply text.
    pub async fn handle_inbound(
        self: &Arc<Self>,
        content: &str,
        channel: &str,
        chat_id: &str,
    ) -> String {
        if !has_decomposition_hint(content) {
            debug!(channel, "simple message; processing locally");
            let session_key = format!("{channel}:{chat_id}");
            return match self.agent.process_direct(content, &session_key).await {
                Ok(reply) => reply,
                Err(err) => format!("processing failed: {err}"),
            };
        }

        let task = SwarmTask::new(TaskType::Workflow, "general", content)
            .with_priority(TaskPriority::High)
            .with_timeout_ms(WORKFLOW_TASK_TIMEOUT_MS);
        info!(task_id = %task.id, "decomposable message; dispatching workflow");

        match self.dispatch(task).await {
            Ok(result) if result.is_success() => result.output,
            Ok(result) => format!(
                "task failed: {}",
                result.error.unwrap_or_else(|| "unknown error".to_string())
            ),
            Err(err) => format!("task failed: {err}"),
        }
    }

    /// Dispatch a task by its type variant.
    pub async fn dispatch(self: &Arc<Self>, task: SwarmTask) -> SwarmResult<TaskResult> {
        match task.task_type {
            TaskType::Workflow => self.dispatch_workflow(task).await,
            TaskType::Direct => self.dispatch_direct(task).await,
            TaskType::Broadcast => {
                let mut task = task;
                task.assigned_to.clear();
                self.dispatch_remote(task).await
            }
        }
    }

    /// Workflow: external runner when reachable, in-process engine otherwise.
    async fn dispatch_workflow(self: &Arc<Self>, mut task: SwarmTask) -> SwarmResult<TaskResult> {
        if self.workflow_enabled {
            if let Some(runner) = &self.workflow_runner {
                if runner.is_healthy().await {
                    debug!(task_id = %task.id, "running workflow on external runner");
                    return runner.run(&task).await;
                }
                warn!(task_id = %task.id, "workflow runner unreachable; using in-process engine");
            }
            self.lifecycle
                .append(&task, TaskEventType::Created, "workflow started", None)
                .await?;
            let engine = WorkflowEngine::new(
                Arc::clone(&self.chat),
                Arc::clone(self) as Arc<dyn SubtaskExecutor>,
                self.model.clone(),
            );
            return match engine.run(&task).await {
                Ok(result) => {
                    task.status = if result.is_success() {
                        TaskStatus::Done
                    } else {
                        TaskStatus::Failed
                    };
                    let (event, message) = if result.is_success() {
                        (TaskEventType::Completed, "workflow completed".to_string())
                    } else {
                        (
                            TaskEventType::Failed,
                            result.error.clone().unwrap_or_default(),
                        )
                    };
                    if let Err(err) = self.lifecycle.append(&task, event, message, None).await {
                        warn!(%err, task_id = %task.id, "failed to record workflow outcome");
                    }
                    Ok(result)
                }
                Err(err) => {
                    task.status = TaskStatus::Failed;
                    if let Err(append_err) = self
                        .lifecycle
                        .append(&task, TaskEventType::Failed, err.to_string(), None)
                        .await
                    {
                        warn!(%append_err, task_id = %task.id, "failed to record workflow failure");
                    }
                    Ok(TaskResult::failed(&task.id, err.to_string()))
                }
            };
        }

        // Workflow support disabled entirely: degrade to direct dispatch.
        let mut direct = task;
        direct.task_type = TaskType::Direct;
        self.dispatch_direct(direct).await
    }

    /// Direct: pick a worker, or execute locally when none qualifies.
    async fn dispatch_direct(&self, mut task: SwarmTask) -> SwarmResult<TaskResult> {
        if task.assigned_to.is_empty() {
            match self
                .discovery
                .select_worker(&task.capability, task.priority)
                .await
            {
                Some(node_id) => task.assigned_to = node_id,
                None => {
                    debug!(task_id = %task.id, "no capable worker; executing locally");
                    return Ok(self.execute_local(task).await);
                }
            }
        }
        self.dispatch_remote(task).await
    }

    /// Publish onto the capability subject and await the result.
    ///
    /// The result waiter and subscription are registered before the publish
    /// so a fast worker cannot race them.
    async fn dispatch_remote(&self, mut task: SwarmTask) -> SwarmResult<TaskResult> {
        task.status = TaskStatus::Pending;
        // The serialized task rides along so failover can republish it.
        let mut metadata = HashMap::new();
        metadata.insert("task".to_string(), serde_json::to_string(&task)?);
        self.lifecycle
            .append(&task, TaskEventType::Created, "dispatched to swarm", Some(metadata))
            .await?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(task.id.clone(), tx);

        let mut result_sub = match self
            .transport
            .subscribe(&subjects::task_result(&task.id))
            .await
        {
            Ok(sub) => sub,
            Err(err) => {
                self.pending.lock().await.remove(&task.id);
                return Err(err.into());
            }
        };

        let pending = Arc::clone(&self.pending);
        let task_id = task.id.clone();
        tokio::spawn(async move {
            if let Some(msg) = result_sub.next().await {
                match serde_json::from_slice::<TaskResult>(&msg.payload) {
                    Ok(result) => {
                        if let Some(tx) = pending.lock().await.remove(&result.task_id) {
                            let _ = tx.send(result);
                        }
                    }
                    Err(err) => warn!(%err, task_id = %task_id, "undecodable task result"),
                }
            }
        });

        let payload = serde_json::to_vec(&task)?;
        if let Err(err) = self
            .transport
            .publish(&subjects::task_dispatch(&task.capability), payload)
            .await
        {
            self.pending.lock().await.remove(&task.id);
            return Err(err.into());
        }

        match tokio::time::timeout(task.effective_timeout(), rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&task.id);
                Err(SwarmError::Cancelled)
            }
            Err(_) => {
                self.pending.lock().await.remove(&task.id);
                warn!(task_id = %task.id, "dispatch timed out");
                Ok(TaskResult::failed(&task.id, "task timeout"))
            }
        }
    }

    /// Run the task on the local agent, with full lifecycle events.
    async fn execute_local(&self, mut task: SwarmTask) -> TaskResult {
        let node_id = self.membership.node_id().to_string();
        task.assigned_to.clone_from(&node_id);
        task.status = TaskStatus::Running;
        if let Err(err) = self
            .lifecycle
            .append(&task, TaskEventType::Started, "executing locally", None)
            .await
        {
            warn!(%err, task_id = %task.id, "failed to record local start");
        }

        let session_key = format!("swarm:{}", task.id);
        match tokio::time::timeout(
            task.effective_timeout(),
            self.agent.process_direct(&task.prompt, &session_key),
        )
        .await
        {
            Ok(Ok(output)) => {
                task.status = TaskStatus::Done;
                if let Err(err) = self
                    .lifecycle
                    .append(&task, TaskEventType::Completed, "local execution completed", None)
                    .await
                {
                    warn!(%err, task_id = %task.id, "failed to record local completion");
                }
                TaskResult::done(&task.id, &node_id, format!("=== {node_id} ===\n{output}"))
            }
            Ok(Err(err)) => {
                task.status = TaskStatus::Failed;
                if let Err(append_err) = self
                    .lifecycle
                    .append(&task, TaskEventType::Failed, err.to_string(), None)
                    .await
                {
                    warn!(%append_err, task_id = %task.id, "failed to record local failure");
                }
                TaskResult::failed(&task.id, err.to_string())
            }
            Err(_) => {
                task.status = TaskStatus::Failed;
                if let Err(append_err) = self
                    .lifecycle
                    .append(&task, TaskEventType::Failed, "task timeout", None)
                    .await
                {
                    warn!(%append_err, task_id = %task.id, "failed to record local timeout");
                }
                TaskResult::failed(&task.id, "task timeout")
            }
        }
    }
}

#[async_trait]
impl SubtaskExecutor for Coordinator {
    async fn execute_subtask(&self, task: SwarmTask) -> SwarmResult<TaskResult> {
        self.dispatch_direct(task).await
    }
}
