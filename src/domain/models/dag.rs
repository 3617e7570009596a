//! Task dependency graph model.
//!
//! Wraps swarm tasks in graph nodes with declared dependencies and keeps
//! the graph acyclic by construction: any edge insertion that would close a
//! cycle is rejected at the call site.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::task::SwarmTask;
use crate::domain::error::DagError;

/// Execution state of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting on dependencies.
    Pending,
    /// All dependencies completed; eligible to launch.
    Ready,
    /// Launched.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Never ran because an upstream dependency failed.
    Skipped,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// A node in the task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub task: SwarmTask,
    /// Ids of nodes that must complete before this one runs.
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub state: NodeState,
    #[serde(default)]
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, task: SwarmTask) -> Self {
        Self {
            id: id.into(),
            task,
            dependencies: Vec::new(),
            state: NodeState::Pending,
            result: String::new(),
            error: None,
        }
    }
}

/// An acyclic task dependency graph.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: HashMap<String, GraphNode>,
    /// Forward adjacency: edges from a node to its dependents.
    edges: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Duplicate ids are rejected.
    pub fn add_node(&mut self, node: GraphNode) -> Result<(), DagError> {
        if self.nodes.contains_key(&node.id) {
            return Err(DagError::DuplicateNode(node.id));
        }
        self.edges.entry(node.id.clone()).or_default();
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Declare that `to` depends on `from` (edge `from → to`).
    ///
    /// Rejected if either endpoint is unknown or if a path `to ⇒ from`
    /// already exists, which would close a cycle.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<(), DagError> {
        if !self.nodes.contains_key(from) {
            return Err(DagError::UnknownNode(from.to_string()));
        }
        if !self.nodes.contains_key(to) {
            return Err(DagError::UnknownNode(to.to_string()));
        }
        if from == to || self.has_path(to, from) {
            return Err(DagError::CycleDetected {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.edges.entry(from.to_string()).or_default().push(to.to_string());
        if let Some(node) = self.nodes.get_mut(to) {
            if !node.dependencies.iter().any(|d| d == from) {
                node.dependencies.push(from.to_string());
            }
        }
        Ok(())
    }

    /// Whether a path `from ⇒ to` exists in the forward edge set.
    fn has_path(&self, from: &str, to: &str) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(from.to_string());
        while let Some(id) = queue.pop_front() {
            if id == to {
                return true;
            }
            if seen.insert(id.clone()) {
                if let Some(next) = self.edges.get(&id) {
                    queue.extend(next.iter().cloned());
                }
            }
        }
        false
    }

    /// Full validation: every referenced dependency exists and the combined
    /// edge set (adjacency plus per-node dependency lists) is acyclic.
    pub fn validate(&self) -> Result<(), DagError> {
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    return Err(DagError::MissingDependency {
                        node: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut visited = HashSet::new();
        let mut stack = HashSet::new();
        for id in self.nodes.keys() {
            if self.cycle_dfs(id, &mut visited, &mut stack) {
                return Err(DagError::CycleDetected {
                    from: id.clone(),
                    to: id.clone(),
                });
            }
        }
        Ok(())
    }

    fn cycle_dfs(&self, id: &str, visited: &mut HashSet<String>, stack: &mut HashSet<String>) -> bool {
        if stack.contains(id) {
            return true;
        }
        if visited.contains(id) {
            return false;
        }
        visited.insert(id.to_string());
        stack.insert(id.to_string());

        let forward = self.edges.get(id).into_iter().flatten();
        // Dependency lists may carry edges the adjacency map does not.
        let declared = self
            .nodes
            .values()
            .filter(|n| n.dependencies.iter().any(|d| d == id))
            .map(|n| &n.id);
        for next in forward.chain(declared) {
            if self.cycle_dfs(next, visited, stack) {
                return true;
            }
        }

        stack.remove(id);
        false
    }

    /// Nodes eligible to launch: Pending with every dependency Completed,
    /// or Pending roots with no dependencies at all.
    pub fn ready_nodes(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.state == NodeState::Pending)
            .filter(|n| {
                n.dependencies.iter().all(|dep| {
                    self.nodes
                        .get(dep)
                        .is_some_and(|d| d.state == NodeState::Completed)
                })
            })
            .map(|n| n.id.clone())
            .collect()
    }

    /// All nodes transitively downstream of `id`.
    pub fn dependents_of(&self, id: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(next) = self.edges.get(id) {
            queue.extend(next.iter().cloned());
        }
        while let Some(current) = queue.pop_front() {
            if result.insert(current.clone()) {
                if let Some(next) = self.edges.get(&current) {
                    queue.extend(next.iter().cloned());
                }
            }
        }
        result
    }

    pub fn get(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.get_mut(id)
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether every node has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.nodes.values().all(|n| n.state.is_terminal())
    }
}
