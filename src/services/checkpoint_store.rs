//! Checkpoint store over the durable `TASK_CHECKPOINTS` stream.
//!
//! Identical shape to the lifecycle stream: one subject per task, JSON
//! bodies, capped retention. Failover restores from the newest checkpoint.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::domain::error::SwarmResult;
use crate::domain::models::checkpoint::TaskCheckpoint;
use crate::domain::ports::transport::{ConsumerConfig, StreamConfig, Transport};
use crate::infrastructure::transport::subjects;

const SCAN_BATCH: usize = 256;
const SCAN_DEADLINE: Duration = Duration::from_secs(5);

/// Save and restore task checkpoints.
pub struct CheckpointStore {
    transport: Arc<dyn Transport>,
}

impl CheckpointStore {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Create the checkpoint stream if absent.
    pub async fn init(&self) -> SwarmResult<()> {
        self.transport
            .ensure_stream(StreamConfig::new(
                subjects::CHECKPOINT_STREAM,
                vec![subjects::task_checkpoint_filter()],
            ))
            .await?;
        Ok(())
    }

    /// Persist a checkpoint.
    pub async fn save(&self, checkpoint: &TaskCheckpoint) -> SwarmResult<()> {
        let payload = serde_json::to_vec(checkpoint)?;
        self.transport
            .publish(&subjects::task_checkpoint(&checkpoint.task_id), payload)
            .await?;
        Ok(())
    }

    /// The newest checkpoint for a task, if any survives retention.
    pub async fn latest(&self, task_id: &str) -> SwarmResult<Option<TaskCheckpoint>> {
        let mut newest: Option<TaskCheckpoint> = None;
        let mut cursor =
            ConsumerConfig::ephemeral().with_filter(subjects::task_checkpoint(task_id));
        let started = tokio::time::Instant::now();
        loop {
            let batch = self
                .transport
                .fetch(subjects::CHECKPOINT_STREAM, &cursor, SCAN_BATCH, Duration::ZERO)
                .await?;
            if batch.is_empty() {
                break;
            }
            let last_seq = batch.last().map_or(0, |m| m.stream_seq);
            for msg in batch {
                match serde_json::from_slice::<TaskCheckpoint>(&msg.payload) {
                    Ok(cp) => {
                        let fresher = newest
                            .as_ref()
                            .is_none_or(|current| cp.created_at > current.created_at);
                        if fresher {
                            newest = Some(cp);
                        }
                    }
                    Err(err) => warn!(%err, "skipping undecodable checkpoint"),
                }
            }
            cursor = cursor.after_seq(last_seq);
            if started.elapsed() > SCAN_DEADLINE {
                break;
            }
        }
        Ok(newest)
    }
}
