//! Agent runtime port - the local collaborator that actually runs prompts.

use async_trait::async_trait;

use crate::domain::error::SwarmError;
use crate::domain::ports::bus::InboundMessage;

/// The local agent runtime a node delegates execution to.
///
/// The runtime owns prompt assembly, tool calling, and session state; the
/// swarm core only hands it work and collects the answer.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Run a prompt under the given session key and return the answer.
    async fn process_direct(&self, prompt: &str, session_key: &str) -> Result<String, SwarmError>;

    /// Handle a raw inbound message from the local bus.
    async fn process_inbound(&self, message: &InboundMessage) -> Result<String, SwarmError>;

    /// Inform the runtime of the identity it is serving.
    async fn set_identity(&self, hid: &str, sid: &str);
}
