//! DAG executor: bounded-parallel execution of task graphs.
//!
//! Launches every ready node under a semaphore and reschedules on each
//! completion event rather than polling. The first failure stops new
//! launches; running nodes drain, transitive dependents of the failed node
//! are marked Skipped, and partial results are returned with the error.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::models::dag::{NodeState, TaskGraph};
use crate::services::workflow_engine::SubtaskExecutor;

/// Default parallelism ceiling.
pub const DEFAULT_MAX_PARALLEL: usize = 5;

/// Outcome of a graph run.
#[derive(Debug)]
pub struct DagExecutionResults {
    /// Output per completed node.
    pub results: HashMap<String, String>,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// First failure, when any node failed.
    pub error: Option<String>,
    /// The graph with final node states.
    pub graph: TaskGraph,
}

impl DagExecutionResults {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs task graphs with bounded parallelism.
pub struct DagExecutor {
    executor: Arc<dyn SubtaskExecutor>,
    max_parallel: usize,
}

impl DagExecutor {
    pub fn new(executor: Arc<dyn SubtaskExecutor>) -> Self {
        Self {
            executor,
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Execute the graph to quiescence.
    ///
    /// Errors immediately on an invalid graph; node failures are reported
    /// through the results instead.
    pub async fn execute(&self, mut graph: TaskGraph) -> SwarmResult<DagExecutionResults> {
        graph.validate()?;
        info!(nodes = graph.len(), max_parallel = self.max_parallel, "executing task graph");

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let (tx, mut rx) = mpsc::channel::<(String, SwarmResult<crate::domain::models::task::TaskResult>)>(
            graph.len().max(1),
        );

        let mut running = 0usize;
        let mut first_error: Option<String> = None;
        let mut results: HashMap<String, String> = HashMap::new();
        let mut failed_nodes: Vec<String> = Vec::new();

        loop {
            // Launch everything ready, unless the run is already failing.
            if first_error.is_none() {
                for id in graph.ready_nodes() {
                    let Some(node) = graph.get_mut(&id) else { continue };
                    node.state = NodeState::Running;
                    debug!(node = %id, "launching graph node");

                    let task = node.task.clone();
                    let executor = Arc::clone(&self.executor);
                    let semaphore = Arc::clone(&semaphore);
                    let tx = tx.clone();
                    running += 1;
                    tokio::spawn(async move {
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            return;
                        };
                        let outcome = executor.execute_subtask(task).await;
                        let _ = tx.send((id, outcome)).await;
                    });
                }
            }

            if running == 0 {
                break;
            }

            let Some((id, outcome)) = rx.recv().await else {
                break;
            };
            running -= 1;

            let Some(node) = graph.get_mut(&id) else { continue };
            match outcome {
                Ok(result) if result.is_success() => {
                    node.state = NodeState::Completed;
                    node.result.clone_from(&result.output);
                    results.insert(id, result.output);
                }
                Ok(result) => {
                    let reason = result.error.unwrap_or_else(|| "unknown error".to_string());
                    warn!(node = %id, %reason, "graph node failed");
                    node.state = NodeState::Failed;
                    node.error = Some(reason.clone());
                    failed_nodes.push(id);
                    first_error.get_or_insert(reason);
                }
                Err(err) => {
                    warn!(node = %id, %err, "graph node errored");
                    node.state = NodeState::Failed;
                    node.error = Some(err.to_string());
                    failed_nodes.push(id);
                    first_error.get_or_insert(err.to_string());
                }
            }
        }

        // Downstream of a failure nothing can run; mark it so callers can
        // tell skipped work from work that never got scheduled.
        let mut skipped = 0;
        for failed in &failed_nodes {
            for dependent in graph.dependents_of(failed) {
                if let Some(node) = graph.get_mut(&dependent) {
                    if node.state == NodeState::Pending {
                        node.state = NodeState::Skipped;
                        skipped += 1;
                    }
                }
            }
        }

        let completed = results.len();
        Ok(DagExecutionResults {
            results,
            completed,
            failed: failed_nodes.len(),
            skipped,
            error: first_error,
            graph,
        })
    }
}

/// Validate-and-execute convenience for callers holding raw nodes.
pub async fn execute_nodes(
    executor: Arc<dyn SubtaskExecutor>,
    graph: TaskGraph,
    max_parallel: usize,
) -> SwarmResult<DagExecutionResults> {
    DagExecutor::new(executor)
        .with_max_parallel(max_parallel)
        .execute(graph)
        .await
}
