//! Local message bus port - inbound user traffic and outbound replies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::SwarmError;

/// A message arriving from a local channel (chat frontend, CLI, webhook).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
}

/// A reply headed back out to a local channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
}

impl OutboundMessage {
    /// Build the reply envelope for an inbound message.
    pub fn reply_to(inbound: &InboundMessage, content: impl Into<String>) -> Self {
        Self {
            channel: inbound.channel.clone(),
            chat_id: inbound.chat_id.clone(),
            content: content.into(),
        }
    }
}

/// The local bus the coordinator drains.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Next inbound message; `None` when the bus shuts down.
    async fn next_inbound(&self) -> Option<InboundMessage>;

    /// Publish a reply.
    async fn publish_outbound(&self, message: OutboundMessage) -> Result<(), SwarmError>;
}
