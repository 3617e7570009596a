//! Shared doubles and stack helpers for the integration suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use nydus::domain::error::{ChatError, SwarmError};
use nydus::domain::models::config::MembershipConfig;
use nydus::domain::models::identity::NodeIdentity;
use nydus::domain::models::node::{NodeInfo, NodeRole};
use nydus::domain::ports::agent::AgentRuntime;
use nydus::domain::ports::bus::{InboundMessage, MessageBus, OutboundMessage};
use nydus::domain::ports::chat::{ChatMessage, ChatOptions, ChatProvider, ChatResponse};
use nydus::domain::ports::transport::Transport;
use nydus::infrastructure::transport::EmbeddedTransport;
use nydus::services::{LifecycleStore, MembershipService, WorkerService};

/// Heartbeat timings fast enough for test-scale failover.
pub fn quick_membership_config() -> MembershipConfig {
    MembershipConfig {
        heartbeat_interval_ms: 30,
        suspicion_timeout_ms: 90,
        offline_timeout_ms: 180,
        expire_timeout_ms: 900,
    }
}

/// Echo agent: answers every prompt, optionally slowly.
pub struct EchoAgent {
    pub delay: Duration,
}

impl EchoAgent {
    pub fn instant() -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::ZERO,
        })
    }
}

#[async_trait]
impl AgentRuntime for EchoAgent {
    async fn process_direct(&self, prompt: &str, _session_key: &str) -> Result<String, SwarmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(format!("echo: {prompt}"))
    }

    async fn process_inbound(&self, message: &InboundMessage) -> Result<String, SwarmError> {
        Ok(message.content.clone())
    }

    async fn set_identity(&self, _hid: &str, _sid: &str) {}
}

/// Bus double that never produces inbound traffic.
pub struct NullBus;

#[async_trait]
impl MessageBus for NullBus {
    async fn next_inbound(&self) -> Option<InboundMessage> {
        std::future::pending().await
    }

    async fn publish_outbound(&self, _message: OutboundMessage) -> Result<(), SwarmError> {
        Ok(())
    }
}

/// Chat double that replays a script and records every prompt it was sent.
pub struct ScriptedChat {
    responses: Mutex<Vec<Result<String, ChatError>>>,
    pub prompts: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl ScriptedChat {
    pub fn new(responses: Vec<Result<String, ChatError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        _opts: &ChatOptions,
    ) -> Result<ChatResponse, ChatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(user) = messages.iter().rev().find(|m| m.role == "user") {
            self.prompts.lock().unwrap().push(user.content.clone());
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(ChatError::RequestFailed("script exhausted".to_string()));
        }
        responses.remove(0).map(|content| ChatResponse {
            content,
            model: model.to_string(),
        })
    }

    fn default_model(&self) -> String {
        "scripted-model".to_string()
    }
}

/// A worker node stack: membership gossip plus a dispatch consumer.
pub struct WorkerStack {
    pub membership: Arc<MembershipService>,
    pub worker: Arc<WorkerService>,
}

impl WorkerStack {
    pub fn stop(&self) {
        self.worker.stop();
        self.membership.stop();
    }
}

/// Bring up a worker node on the shared transport.
pub async fn spawn_worker(
    transport: &Arc<EmbeddedTransport>,
    node_id: &str,
    capabilities: &[&str],
    max_tasks: u32,
) -> WorkerStack {
    let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
    let identity = NodeIdentity::generate(
        Some("home".to_string()),
        Some("svc".to_string()),
        Some(node_id.to_string()),
    );
    let mut info = NodeInfo::new(node_id, NodeRole::Worker);
    info.capabilities = capabilities.iter().map(|c| (*c).to_string()).collect();
    info.max_tasks = max_tasks;
    let membership = Arc::new(MembershipService::new(
        Arc::clone(&transport),
        identity,
        quick_membership_config(),
        info,
    ));
    membership.start().await.expect("membership start");

    let lifecycle = Arc::new(LifecycleStore::new(Arc::clone(&transport), node_id));
    lifecycle.init().await.expect("lifecycle init");
    let worker = Arc::new(WorkerService::new(
        transport,
        EchoAgent::instant(),
        lifecycle,
        Arc::clone(&membership),
        capabilities.iter().map(|c| (*c).to_string()).collect(),
        max_tasks,
    ));
    worker.start().await.expect("worker start");

    WorkerStack { membership, worker }
}

/// Wait until the predicate holds or the deadline passes.
pub async fn wait_for<F, Fut>(deadline: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
