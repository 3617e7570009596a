//! Ports: the trait seams between the core and its collaborators.

pub mod agent;
pub mod authorizer;
pub mod bus;
pub mod chat;
pub mod transport;
pub mod workflow;

pub use agent::AgentRuntime;
pub use authorizer::{AuthDecision, Authorizer};
pub use bus::{InboundMessage, MessageBus, OutboundMessage};
pub use chat::{ChatMessage, ChatOptions, ChatProvider, ChatResponse};
pub use transport::{
    ConsumerConfig, DeliverPolicy, DiscardPolicy, Message, StoredMessage, StreamConfig,
    Subscription, Transport,
};
pub use workflow::WorkflowRunner;
