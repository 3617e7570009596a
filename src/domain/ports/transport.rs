//! Transport port - pub/sub, request/reply, and durable streams.
//!
//! The core depends on this interface only; subject strings and the broker
//! itself live behind it. Delivery is at-least-once. Wildcards follow the
//! usual subject rules: `*` matches one token, `>` matches the rest.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::error::TransportError;

/// A message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Message {
    pub subject: String,
    pub payload: Vec<u8>,
    /// Inbox subject to reply on, when the sender used `request`.
    pub reply: Option<String>,
}

/// A live subscription handle.
///
/// Dropping the handle cancels delivery; the transport prunes the
/// registration lazily.
pub struct Subscription {
    receiver: mpsc::Receiver<Message>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<Message>) -> Self {
        Self { receiver }
    }

    /// Next message, or `None` once the transport side closes.
    pub async fn next(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Non-blocking variant for drain loops.
    pub fn try_next(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}

/// Retention policy when a stream hits its size cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardPolicy {
    /// Drop the oldest messages to admit new ones.
    Old,
    /// Refuse new messages.
    New,
}

/// Configuration for a named durable stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream name. Dots are disallowed; underscores only.
    pub name: String,
    /// Subject filters captured by the stream.
    pub subjects: Vec<String>,
    pub max_age: Duration,
    pub max_bytes: u64,
    pub discard: DiscardPolicy,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_bytes: 100 * 1024 * 1024,
            discard: DiscardPolicy::Old,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

/// Where a consumer starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverPolicy {
    /// Replay from the first retained message.
    All,
    /// Only messages published after the consumer is created.
    New,
}

/// A pull consumer over a stream.
///
/// Durable consumers persist their cursor across fetches under their name;
/// ephemeral consumers (no durable name) read from scratch each time.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub durable: Option<String>,
    pub deliver_policy: DeliverPolicy,
    /// Restrict delivery to messages matching this subject filter.
    pub filter_subject: Option<String>,
    /// Ephemeral cursor: deliver only messages with `stream_seq > start_seq`.
    /// Lets a stateless consumer page through a stream without server-side
    /// state. Ignored when a durable cursor is further along.
    pub start_seq: Option<u64>,
}

impl ConsumerConfig {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            durable: Some(name.into()),
            deliver_policy: DeliverPolicy::All,
            filter_subject: None,
            start_seq: None,
        }
    }

    pub fn ephemeral() -> Self {
        Self {
            durable: None,
            deliver_policy: DeliverPolicy::All,
            filter_subject: None,
            start_seq: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_subject = Some(filter.into());
        self
    }

    pub fn with_deliver_policy(mut self, policy: DeliverPolicy) -> Self {
        self.deliver_policy = policy;
        self
    }

    pub fn after_seq(mut self, seq: u64) -> Self {
        self.start_seq = Some(seq);
        self
    }
}

/// A message read back from a stream, with its stream metadata.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    pub stream_seq: u64,
    pub timestamp: DateTime<Utc>,
}

/// The transport contract the core is written against.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget publish.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribe to a subject pattern.
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, TransportError>;

    /// Subscribe as part of a queue group: each message goes to exactly one
    /// member of the group.
    async fn queue_subscribe(&self, pattern: &str, group: &str)
        -> Result<Subscription, TransportError>;

    /// Point-to-point request; the first reply wins.
    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Message, TransportError>;

    /// Create the stream if it does not already exist.
    async fn ensure_stream(&self, config: StreamConfig) -> Result<(), TransportError>;

    /// Pull up to `batch` messages for the consumer, waiting up to `wait`
    /// for the first one. An empty result means the consumer is caught up.
    async fn fetch(
        &self,
        stream: &str,
        consumer: &ConsumerConfig,
        batch: usize,
        wait: Duration,
    ) -> Result<Vec<StoredMessage>, TransportError>;

    /// Acknowledge a message for a durable consumer, advancing its cursor.
    async fn ack(&self, stream: &str, durable: &str, seq: u64) -> Result<(), TransportError>;

    /// Drop a durable consumer's cursor. Missing consumers are not an error.
    async fn delete_consumer(&self, stream: &str, durable: &str) -> Result<(), TransportError>;

    /// Delete a single message from a stream by sequence.
    async fn delete_msg(&self, stream: &str, seq: u64) -> Result<(), TransportError>;

    /// Shut the transport down; subsequent operations fail with `Closed`.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Validate a stream or durable consumer name: dots would collide with
/// subject hierarchy, so only word characters and dashes are accepted.
pub fn validate_durable_name(name: &str) -> Result<(), TransportError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(TransportError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durable_name_rejects_dots() {
        assert!(validate_durable_name("TASKS").is_ok());
        assert!(validate_durable_name("active-tasks-scan").is_ok());
        assert!(validate_durable_name("TASK_CHECKPOINTS").is_ok());
        assert!(validate_durable_name("tasks.status").is_err());
        assert!(validate_durable_name("").is_err());
    }

    #[test]
    fn test_stream_config_defaults() {
        let cfg = StreamConfig::new("TASKS", vec!["tasks.>".to_string()]);
        assert_eq!(cfg.max_age, Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(cfg.max_bytes, 100 * 1024 * 1024);
        assert_eq!(cfg.discard, DiscardPolicy::Old);
    }
}
