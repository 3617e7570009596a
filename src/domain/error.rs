//! Domain error types.
//!
//! One enum per component family, with transient/permanent classifiers
//! driving retry decisions at the call sites.

use thiserror::Error;

/// Result alias for swarm-level operations.
pub type SwarmResult<T> = Result<T, SwarmError>;

/// Errors from the transport layer.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport is shut down or the connection dropped.
    #[error("transport closed: {0}")]
    Closed(String),

    /// A request got no reply within its deadline.
    #[error("request timed out after {0:?}")]
    RequestTimeout(std::time::Duration),

    /// Nobody is subscribed to the request subject.
    #[error("no responders on subject {0}")]
    NoResponders(String),

    /// Named stream does not exist.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Message sequence not present in the stream (already deleted or aged out).
    #[error("message {seq} not found in stream {stream}")]
    MessageNotFound { stream: String, seq: u64 },

    /// Invalid subject or stream name.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Payload could not be encoded or decoded.
    #[error("payload codec error: {0}")]
    Codec(String),
}

impl TransportError {
    /// Whether retrying the operation could succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RequestTimeout(_) | Self::NoResponders(_))
    }
}

/// Errors from LLM chat calls.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    RequestFailed(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("chat response invalid: {0}")]
    InvalidResponse(String),

    #[error("chat timed out after {0} seconds")]
    Timeout(u64),
}

impl ChatError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed(_) | Self::RateLimited | Self::Timeout(_))
    }
}

/// Errors from task dependency graphs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DagError {
    /// A node with this id is already present.
    #[error("duplicate node: {0}")]
    DuplicateNode(String),

    /// Edge endpoint does not exist.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// Inserting the edge would close a cycle.
    #[error("dependency cycle: {from} -> {to}")]
    CycleDetected { from: String, to: String },

    /// A node references a dependency that is not in the graph.
    #[error("node {node} references missing dependency {dependency}")]
    MissingDependency { node: String, dependency: String },
}

/// Errors from cross-domain bridging.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Destination HID is not in the imported set.
    #[error("hid {0} is not imported; refusing to send")]
    NotImported(String),

    /// Origin HID is not in the exported set.
    #[error("hid {0} is not exported; dropping message")]
    NotExported(String),

    /// The authorizer rejected the action.
    #[error("authorization denied: {0}")]
    Denied(String),
}

/// Top-level swarm error.
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// No member advertises the required capability with free capacity.
    #[error("no capable worker for capability {0}")]
    NoCapableWorker(String),

    /// The task's own deadline elapsed.
    #[error("task timeout")]
    TaskTimeout,

    /// The local agent collaborator failed.
    #[error("agent execution failed: {0}")]
    AgentFailed(String),

    /// The workflow failed after exhausting its retry policies.
    #[error("workflow failed: {0}")]
    WorkflowFailed(String),

    /// The enclosing context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SwarmError {
    /// Whether retrying the operation could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            Self::Chat(e) => e.is_transient(),
            Self::TaskTimeout | Self::AgentFailed(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
