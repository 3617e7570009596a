//! Chat provider port - interface to the LLM backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::ChatError;

/// Fallback model when neither configuration nor the provider names one.
pub const FALLBACK_MODEL: &str = "gpt-4";

/// A single message in a chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user", or "assistant".
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Options applied to a chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Response from the provider.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

/// Trait for LLM chat backends.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run one chat completion.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        opts: &ChatOptions,
    ) -> Result<ChatResponse, ChatError>;

    /// The provider's preferred model.
    fn default_model(&self) -> String;
}

/// Resolve the model to use: configured value, then provider default, then
/// the hard fallback.
pub fn resolve_model(configured: &str, provider: &dyn ChatProvider) -> String {
    if !configured.is_empty() {
        return configured.to_string();
    }
    let default = provider.default_model();
    if default.is_empty() {
        FALLBACK_MODEL.to_string()
    } else {
        default
    }
}
