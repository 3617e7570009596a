//! Authorizer port - optional upgrade for cross-domain checks.

use async_trait::async_trait;

/// Outcome of an authorization check.
#[derive(Debug, Clone)]
pub struct AuthDecision {
    pub allowed: bool,
    pub reason: String,
}

impl AuthDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Consulted by the cross-domain bridge before a send when the policy is
/// `auth`. Denial short-circuits the send with the returned reason.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, hid: &str, sid: &str, action: &str, resource: &str) -> AuthDecision;
}
