//! Task lifecycle store over the durable `TASKS` stream.
//!
//! Append-only: every state change publishes a `TaskEvent` to the task's
//! status subject, which the stream captures. Reads replay the stream and
//! fold events per task, sorted by `(timestamp, event_id)` with terminal
//! events absorbing. Delivery is at-least-once, so folds dedupe on
//! `event_id`. The stream is capped at seven days / 100 MB, so scans
//! reflect only the recent window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::error::SwarmResult;
use crate::domain::models::event::{TaskEvent, TaskEventType};
use crate::domain::models::task::SwarmTask;
use crate::domain::ports::transport::{ConsumerConfig, StreamConfig, Transport};
use crate::infrastructure::transport::subjects;

/// Fetch batch size while draining the stream.
const SCAN_BATCH: usize = 256;

/// Deadline for a full history drain.
const HISTORY_DEADLINE: Duration = Duration::from_secs(5);

/// Append and replay task lifecycle events.
pub struct LifecycleStore {
    transport: Arc<dyn Transport>,
    node_id: String,
}

impl LifecycleStore {
    pub fn new(transport: Arc<dyn Transport>, node_id: impl Into<String>) -> Self {
        Self {
            transport,
            node_id: node_id.into(),
        }
    }

    /// Create the `TASKS` stream if absent.
    pub async fn init(&self) -> SwarmResult<()> {
        self.transport
            .ensure_stream(StreamConfig::new(
                subjects::TASKS_STREAM,
                vec![subjects::task_status_filter()],
            ))
            .await?;
        Ok(())
    }

    /// Append one lifecycle event for the task.
    pub async fn append(
        &self,
        task: &SwarmTask,
        event_type: TaskEventType,
        message: impl Into<String>,
        metadata: Option<HashMap<String, String>>,
    ) -> SwarmResult<TaskEvent> {
        let mut event = TaskEvent::for_task(task, event_type, &self.node_id, message);
        if let Some(metadata) = metadata {
            event.metadata = metadata;
        }
        let payload = serde_json::to_vec(&event)?;
        self.transport
            .publish(&subjects::task_status(&task.id), payload)
            .await?;
        debug!(task_id = %task.id, event = %event_type, "lifecycle event appended");
        Ok(event)
    }

    /// Full event history for one task, order-insensitive.
    pub async fn get_history(&self, task_id: &str) -> SwarmResult<Vec<TaskEvent>> {
        let raw = self
            .drain(
                ConsumerConfig::ephemeral().with_filter(subjects::task_status(task_id)),
                HISTORY_DEADLINE,
            )
            .await?;
        let mut events: Vec<TaskEvent> = Vec::new();
        for (_, event) in raw {
            if !events.iter().any(|e| e.event_id == event.event_id) {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Latest event per task with a non-terminal status, within the stream's
    /// retention window.
    pub async fn get_active_tasks(&self) -> SwarmResult<HashMap<String, TaskEvent>> {
        let latest = self.fold_latest().await?;
        Ok(latest
            .into_iter()
            .filter(|(_, event)| event.status.is_active())
            .collect())
    }

    /// Latest event per task recorded by the given node.
    pub async fn get_tasks_by_node(&self, node_id: &str) -> SwarmResult<Vec<TaskEvent>> {
        let latest = self.fold_latest().await?;
        Ok(latest
            .into_values()
            .filter(|event| event.node_id == node_id)
            .collect())
    }

    /// Remove every stored event for a task.
    pub async fn delete_task_history(&self, task_id: &str) -> SwarmResult<usize> {
        let raw = self
            .drain(
                ConsumerConfig::ephemeral().with_filter(subjects::task_status(task_id)),
                HISTORY_DEADLINE,
            )
            .await?;
        let mut deleted = 0;
        for (seq, _) in raw {
            match self.transport.delete_msg(subjects::TASKS_STREAM, seq).await {
                Ok(()) => deleted += 1,
                Err(err) => warn!(%err, seq, "failed to delete lifecycle message"),
            }
        }
        Ok(deleted)
    }

    /// Replay the whole stream and fold to the latest event per task.
    ///
    /// The scan recreates its durable consumer each run so the fold always
    /// sees the full retained window. Events are sorted by `(timestamp,
    /// event_id)` before folding; stream delivery order alone is not a
    /// cross-node order.
    async fn fold_latest(&self) -> SwarmResult<HashMap<String, TaskEvent>> {
        let _ = self
            .transport
            .delete_consumer(subjects::TASKS_STREAM, subjects::ACTIVE_SCAN_CONSUMER)
            .await;
        let raw = self
            .drain(
                ConsumerConfig::durable(subjects::ACTIVE_SCAN_CONSUMER),
                HISTORY_DEADLINE,
            )
            .await?;

        let mut events: Vec<TaskEvent> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        for (_, event) in raw {
            if seen.insert(event.event_id.clone()) {
                events.push(event);
            }
        }
        events.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });

        let mut latest: HashMap<String, TaskEvent> = HashMap::new();
        for event in events {
            match latest.get(&event.task_id) {
                // Terminal events absorb: later non-terminal writes (late
                // retries, stragglers) never resurrect a finished task.
                Some(current) if current.status.is_terminal() && !event.status.is_terminal() => {}
                _ => {
                    latest.insert(event.task_id.clone(), event);
                }
            }
        }
        Ok(latest)
    }

    /// Page through the stream until an empty fetch or the deadline.
    async fn drain(
        &self,
        consumer: ConsumerConfig,
        deadline: Duration,
    ) -> SwarmResult<Vec<(u64, TaskEvent)>> {
        let started = tokio::time::Instant::now();
        let mut out = Vec::new();
        let mut cursor = consumer;
        loop {
            let batch = self
                .transport
                .fetch(subjects::TASKS_STREAM, &cursor, SCAN_BATCH, Duration::ZERO)
                .await?;
            if batch.is_empty() {
                break;
            }
            let last_seq = batch.last().map_or(0, |m| m.stream_seq);
            for msg in batch {
                match serde_json::from_slice::<TaskEvent>(&msg.payload) {
                    Ok(event) => out.push((msg.stream_seq, event)),
                    Err(err) => warn!(%err, seq = msg.stream_seq, "skipping undecodable event"),
                }
            }
            if let Some(durable) = cursor.durable.clone() {
                self.transport
                    .ack(subjects::TASKS_STREAM, &durable, last_seq)
                    .await?;
            }
            cursor = cursor.after_seq(last_seq);
            if started.elapsed() > deadline {
                warn!("stream drain hit deadline; returning partial scan");
                break;
            }
        }
        Ok(out)
    }
}
