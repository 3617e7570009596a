//! Workflow engine: decompose, fan out, synthesize.
//!
//! Each phase is an activity with its own retry policy. Decomposition asks
//! the LLM for a JSON verdict; anything unparseable degrades to direct
//! execution rather than retrying the same prompt. Fan-out runs subtasks
//! in parallel and folds failures into `[FAILED]` slots; synthesis stitches
//! the attributed partials into one answer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::models::task::{SwarmTask, TaskResult, TaskType};
use crate::domain::ports::chat::{ChatMessage, ChatOptions, ChatProvider};

/// Decompose activity: per-attempt timeout and retry schedule.
const DECOMPOSE_TIMEOUT: Duration = Duration::from_secs(120);
const DECOMPOSE_RETRIES: u32 = 3;
const DECOMPOSE_BACKOFF: Duration = Duration::from_secs(1);

/// Subtask activity limits.
const SUBTASK_TIMEOUT: Duration = Duration::from_secs(600);
const SUBTASK_RETRIES: u32 = 3;
const SUBTASK_BACKOFF: Duration = Duration::from_secs(1);

/// Synthesis activity limits.
const SYNTHESIZE_TIMEOUT: Duration = Duration::from_secs(300);
const SYNTHESIZE_RETRIES: u32 = 3;
const SYNTHESIZE_BACKOFF: Duration = Duration::from_secs(2);
const SYNTHESIZE_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Successful partials are clipped to this many characters in the
/// synthesis prompt; failed slots pass through verbatim.
const PARTIAL_RESULT_BUDGET: usize = 2000;

/// Retry with exponential backoff, doubling each attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff: None,
        }
    }

    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.max_backoff = Some(cap);
        self
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let raw = self.initial_backoff.saturating_mul(2u32.saturating_pow(attempt));
        match self.max_backoff {
            Some(cap) => raw.min(cap),
            None => raw,
        }
    }

    /// Run the operation, retrying transient errors per the schedule.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> SwarmResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SwarmResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_transient() || attempt >= self.max_retries {
                        return Err(err);
                    }
                    let backoff = self.backoff_for(attempt);
                    warn!(%err, attempt = attempt + 1, max = self.max_retries, ?backoff, "retrying activity");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Executes one subtask somewhere in the swarm (or locally).
///
/// The coordinator implements this; the engine stays free of routing
/// concerns and transport details.
#[async_trait]
pub trait SubtaskExecutor: Send + Sync {
    async fn execute_subtask(&self, task: SwarmTask) -> SwarmResult<TaskResult>;
}

/// The LLM's decomposition verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecomposeDecision {
    pub decompose: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub subtasks: Vec<SubtaskSpec>,
}

/// One planned subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub prompt: String,
    #[serde(default)]
    pub capability: String,
}

/// Three-phase workflow pipeline.
pub struct WorkflowEngine {
    chat: Arc<dyn ChatProvider>,
    executor: Arc<dyn SubtaskExecutor>,
    model: String,
}

impl WorkflowEngine {
    pub fn new(
        chat: Arc<dyn ChatProvider>,
        executor: Arc<dyn SubtaskExecutor>,
        model: String,
    ) -> Self {
        Self {
            chat,
            executor,
            model,
        }
    }

    /// Run the full pipeline for a workflow task.
    pub async fn run(&self, task: &SwarmTask) -> SwarmResult<TaskResult> {
        let decision = self.decompose(task).await;

        let subtasks = match decision {
            Some(d) if d.decompose && !d.subtasks.is_empty() => {
                info!(task_id = %task.id, count = d.subtasks.len(), reason = %d.reason, "decomposed task");
                d.subtasks
            }
            _ => {
                debug!(task_id = %task.id, "not decomposable; executing directly");
                let mut direct = task.clone();
                direct.task_type = TaskType::Direct;
                return self.executor.execute_subtask(direct).await;
            }
        };

        let partials = self.fan_out(task, subtasks).await;
        self.synthesize(task, &partials).await
    }

    /// Phase 1: ask the LLM whether and how to split the task.
    ///
    /// `None` means "treat as non-decomposable": the provider was
    /// unreachable past its retries, or the reply was not valid JSON. The
    /// unparseable case is never retried with the same prompt.
    async fn decompose(&self, task: &SwarmTask) -> Option<DecomposeDecision> {
        let messages = [
            ChatMessage::system(
                "You split tasks for a worker swarm. Reply with JSON only: \
                 {\"decompose\": bool, \"reason\": string, \"subtasks\": \
                 [{\"prompt\": string, \"capability\": string}]}. \
                 Decline to decompose indivisible tasks.",
            ),
            ChatMessage::user(format!(
                "Task (capability: {}):\n{}",
                task.capability, task.prompt
            )),
        ];

        let policy = RetryPolicy::new(DECOMPOSE_RETRIES, DECOMPOSE_BACKOFF);
        let opts = ChatOptions::default();
        let response = policy
            .execute(|| async {
                let call = self.chat.chat(&messages, &self.model, &opts);
                match tokio::time::timeout(DECOMPOSE_TIMEOUT, call).await {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(err)) => Err(SwarmError::Chat(err)),
                    Err(_) => Err(SwarmError::TaskTimeout),
                }
            })
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, task_id = %task.id, "decomposition unavailable; degrading to direct");
                return None;
            }
        };

        match serde_json::from_str::<DecomposeDecision>(strip_fences(&response.content)) {
            Ok(decision) => Some(decision),
            Err(err) => {
                warn!(%err, task_id = %task.id, "unparseable decomposition; degrading to direct");
                None
            }
        }
    }

    /// Phase 2: run every subtask in parallel.
    ///
    /// A failed subtask fills its slot with `[FAILED] <reason>` instead of
    /// aborting the workflow.
    async fn fan_out(&self, parent: &SwarmTask, specs: Vec<SubtaskSpec>) -> Vec<String> {
        let jobs = specs.into_iter().map(|spec| {
            let capability = if spec.capability.is_empty() {
                parent.capability.clone()
            } else {
                spec.capability
            };
            let mut subtask = SwarmTask::new(TaskType::Direct, capability, spec.prompt)
                .with_priority(parent.priority)
                .with_parent(&parent.id)
                .with_timeout_ms(SUBTASK_TIMEOUT.as_millis() as u64);
            subtask.workflow_id = Some(parent.id.clone());

            async move {
                let policy = RetryPolicy::new(SUBTASK_RETRIES, SUBTASK_BACKOFF);
                let outcome = policy
                    .execute(|| {
                        let attempt = subtask.clone();
                        async move { self.executor.execute_subtask(attempt).await }
                    })
                    .await;
                match outcome {
                    Ok(result) if result.is_success() => result.output,
                    Ok(result) => format!(
                        "[FAILED] {}",
                        result.error.unwrap_or_else(|| "unknown error".to_string())
                    ),
                    Err(err) => format!("[FAILED] {err}"),
                }
            }
        });
        futures::future::join_all(jobs).await
    }

    /// Phase 3: synthesize the partial results into one answer.
    async fn synthesize(&self, task: &SwarmTask, partials: &[String]) -> SwarmResult<TaskResult> {
        let mut combined = String::new();
        for partial in partials {
            if partial.starts_with("[FAILED]") {
                combined.push_str(partial);
            } else {
                combined.extend(partial.chars().take(PARTIAL_RESULT_BUDGET));
            }
            combined.push_str("\n\n");
        }

        let messages = [
            ChatMessage::system(
                "Synthesize the worker results below into a single coherent \
                 answer to the original task. Mention failed parts briefly.",
            ),
            ChatMessage::user(format!(
                "Original task:\n{}\n\nWorker results:\n{}",
                task.prompt, combined
            )),
        ];

        let policy = RetryPolicy::new(SYNTHESIZE_RETRIES, SYNTHESIZE_BACKOFF)
            .with_cap(SYNTHESIZE_BACKOFF_CAP);
        let opts = ChatOptions::default();
        let response = policy
            .execute(|| async {
                let call = self.chat.chat(&messages, &self.model, &opts);
                match tokio::time::timeout(SYNTHESIZE_TIMEOUT, call).await {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(err)) => Err(SwarmError::Chat(err)),
                    Err(_) => Err(SwarmError::TaskTimeout),
                }
            })
            .await
            .map_err(|err| SwarmError::WorkflowFailed(err.to_string()))?;

        Ok(TaskResult::done(&task.id, "", response.content))
    }
}

/// Strip a markdown code fence if the model wrapped its JSON in one.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim().strip_suffix("```").unwrap_or(inner).trim()
}
