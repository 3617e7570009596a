//! Membership service: announce, heartbeat, and liveness sweeping.
//!
//! Every node broadcasts an announce on join and a heartbeat every
//! interval, each carrying a fresh `NodeInfo` snapshot. Observers keep a
//! node table keyed by observer-local receipt time and age entries through
//! Suspicious and Offline into eviction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::error::SwarmResult;
use crate::domain::models::config::MembershipConfig;
use crate::domain::models::identity::NodeIdentity;
use crate::domain::models::node::{NodeInfo, NodeStatus};
use crate::domain::ports::transport::Transport;
use crate::infrastructure::transport::subjects;

/// A remote node as seen by this observer.
#[derive(Debug, Clone)]
struct MemberEntry {
    info: NodeInfo,
    /// Observer-local receipt time of the freshest heartbeat.
    last_seen: Instant,
    /// Origin-stamped send time, used only to drop out-of-order heartbeats.
    origin_ts: DateTime<Utc>,
}

/// Counts by liveness status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipStats {
    pub online: usize,
    pub busy: usize,
    pub suspicious: usize,
    pub offline: usize,
    pub draining: usize,
}

/// Maintains the live node table.
pub struct MembershipService {
    transport: Arc<dyn Transport>,
    config: MembershipConfig,
    identity: NodeIdentity,
    self_info: Arc<RwLock<NodeInfo>>,
    members: Arc<RwLock<HashMap<String, MemberEntry>>>,
    shutdown: watch::Sender<bool>,
}

impl MembershipService {
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: NodeIdentity,
        config: MembershipConfig,
        mut self_info: NodeInfo,
    ) -> Self {
        self_info
            .metadata
            .insert("hid".to_string(), identity.hid.clone());
        self_info
            .metadata
            .insert("sid".to_string(), identity.sid.clone());
        let (shutdown, _) = watch::channel(false);
        Self {
            transport,
            config,
            identity,
            self_info: Arc::new(RwLock::new(self_info)),
            members: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn node_id(&self) -> &str {
        &self.identity.node_id
    }

    /// Announce, start the gossip consumers, and start the periodic loops.
    pub async fn start(self: &Arc<Self>) -> SwarmResult<()> {
        let payload = {
            let mut info = self.self_info.write().await;
            info.last_seen = Utc::now();
            serde_json::to_vec(&*info)?
        };
        self.transport.publish(&subjects::announce(), payload).await?;
        info!(node_id = %self.identity.node_id, "announced to swarm");

        self.spawn_gossip_consumer(subjects::announce()).await?;
        self.spawn_gossip_consumer(subjects::heartbeat()).await?;
        self.spawn_query_responder().await?;
        self.spawn_heartbeat_loop();
        self.spawn_sweep_loop();
        Ok(())
    }

    /// Stop the loops. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn spawn_gossip_consumer(self: &Arc<Self>, subject: String) -> SwarmResult<()> {
        let mut sub = self.transport.subscribe(&subject).await?;
        let service = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = sub.next() => {
                        let Some(msg) = msg else { break };
                        match serde_json::from_slice::<NodeInfo>(&msg.payload) {
                            Ok(info) => service.observe(info).await,
                            Err(err) => warn!(%err, "dropping malformed gossip payload"),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
        Ok(())
    }

    /// Answer discovery queries with our current snapshot.
    async fn spawn_query_responder(self: &Arc<Self>) -> SwarmResult<()> {
        let mut sub = self.transport.subscribe(&subjects::query()).await?;
        let service = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = sub.next() => {
                        let Some(msg) = msg else { break };
                        if let Some(reply) = msg.reply {
                            let snapshot = service.self_snapshot().await;
                            if let Ok(payload) = serde_json::to_vec(&snapshot) {
                                let _ = service.transport.publish(&reply, payload).await;
                            }
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
        Ok(())
    }

    fn spawn_heartbeat_loop(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let interval = self.config.heartbeat_interval();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(err) = service.beat().await {
                            warn!(%err, "heartbeat publish failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn spawn_sweep_loop(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let interval = self.config.heartbeat_interval();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => service.sweep().await,
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    /// Publish one heartbeat and refresh our own table entry.
    pub async fn beat(&self) -> SwarmResult<()> {
        let snapshot = {
            let mut info = self.self_info.write().await;
            info.last_seen = Utc::now();
            info.clone()
        };
        self.observe(snapshot.clone()).await;
        let payload = serde_json::to_vec(&snapshot)?;
        self.transport.publish(&subjects::heartbeat(), payload).await?;
        Ok(())
    }

    /// Fold a gossip snapshot into the member table.
    ///
    /// The origin timestamp only orders heartbeats from the same node;
    /// liveness is always judged by the observer clock.
    pub async fn observe(&self, info: NodeInfo) {
        let mut members = self.members.write().await;
        let origin_ts = info.last_seen;
        match members.get_mut(&info.node_id) {
            Some(entry) => {
                if origin_ts < entry.origin_ts {
                    debug!(node_id = %info.node_id, "dropping out-of-order heartbeat");
                    return;
                }
                entry.info = info;
                entry.info.last_seen = Utc::now();
                entry.last_seen = Instant::now();
                entry.origin_ts = origin_ts;
            }
            None => {
                debug!(node_id = %info.node_id, "new member");
                let mut info = info;
                info.last_seen = Utc::now();
                members.insert(
                    info.node_id.clone(),
                    MemberEntry {
                        info,
                        last_seen: Instant::now(),
                        origin_ts,
                    },
                );
            }
        }
    }

    /// Age entries through Suspicious and Offline, evicting expired ones.
    pub async fn sweep(&self) {
        let suspicion = std::time::Duration::from_millis(self.config.suspicion_timeout_ms);
        let offline = std::time::Duration::from_millis(self.config.offline_timeout_ms);
        let expire = std::time::Duration::from_millis(self.config.expire_timeout_ms);
        let now = Instant::now();

        let mut members = self.members.write().await;
        members.retain(|node_id, entry| {
            let age = now.saturating_duration_since(entry.last_seen);
            if age > expire {
                info!(%node_id, "evicting expired member");
                return false;
            }
            if age > offline {
                if entry.info.status != NodeStatus::Offline {
                    warn!(%node_id, "member offline");
                    entry.info.status = NodeStatus::Offline;
                }
            } else if age > suspicion {
                if entry.info.status.is_selectable() {
                    debug!(%node_id, "member suspicious");
                    entry.info.status = NodeStatus::Suspicious;
                }
            }
            true
        });
    }

    /// Snapshot of our own advertised state.
    pub async fn self_snapshot(&self) -> NodeInfo {
        self.self_info.read().await.clone()
    }

    pub async fn get(&self, node_id: &str) -> Option<NodeInfo> {
        self.members.read().await.get(node_id).map(|e| e.info.clone())
    }

    /// All cached members, self included once it has heartbeat.
    pub async fn members(&self) -> Vec<NodeInfo> {
        self.members.read().await.values().map(|e| e.info.clone()).collect()
    }

    /// Members currently `Online` (election electorate).
    pub async fn alive_members(&self) -> Vec<NodeInfo> {
        self.members
            .read()
            .await
            .values()
            .filter(|e| e.info.status == NodeStatus::Online)
            .map(|e| e.info.clone())
            .collect()
    }

    /// Members that can be handed work.
    pub async fn selectable_members(&self) -> Vec<NodeInfo> {
        self.members
            .read()
            .await
            .values()
            .filter(|e| e.info.status.is_selectable())
            .map(|e| e.info.clone())
            .collect()
    }

    /// Members the failover manager should scan.
    pub async fn offline_members(&self) -> Vec<NodeInfo> {
        self.members
            .read()
            .await
            .values()
            .filter(|e| e.info.status == NodeStatus::Offline)
            .map(|e| e.info.clone())
            .collect()
    }

    pub async fn stats(&self) -> MembershipStats {
        let members = self.members.read().await;
        let mut stats = MembershipStats::default();
        for entry in members.values() {
            match entry.info.status {
                NodeStatus::Online => stats.online += 1,
                NodeStatus::Busy => stats.busy += 1,
                NodeStatus::Suspicious => stats.suspicious += 1,
                NodeStatus::Offline => stats.offline += 1,
                NodeStatus::Draining => stats.draining += 1,
            }
        }
        stats
    }

    /// Record a locally started task and refresh the advertised load.
    pub async fn task_started(&self) {
        let mut info = self.self_info.write().await;
        info.tasks_running = info.tasks_running.saturating_add(1);
        info.recompute_load();
        if !info.has_slack() && info.status == NodeStatus::Online {
            info.status = NodeStatus::Busy;
        }
    }

    /// Record a locally finished task and refresh the advertised load.
    pub async fn task_finished(&self) {
        let mut info = self.self_info.write().await;
        info.tasks_running = info.tasks_running.saturating_sub(1);
        info.recompute_load();
        if info.has_slack() && info.status == NodeStatus::Busy {
            info.status = NodeStatus::Online;
        }
    }

    /// Flip our advertised status to Draining; heartbeats continue so peers
    /// age us out gracefully instead of failing over immediately.
    pub async fn drain(&self) {
        let mut info = self.self_info.write().await;
        info.status = NodeStatus::Draining;
    }

    /// Advertise a new role on subsequent heartbeats.
    pub async fn set_role(&self, role: crate::domain::models::node::NodeRole) {
        let mut info = self.self_info.write().await;
        info.role = role;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::node::NodeRole;
    use crate::infrastructure::transport::EmbeddedTransport;

    fn quick_config() -> MembershipConfig {
        MembershipConfig {
            heartbeat_interval_ms: 20,
            suspicion_timeout_ms: 60,
            offline_timeout_ms: 120,
            expire_timeout_ms: 600,
        }
    }

    fn service(node_id: &str) -> Arc<MembershipService> {
        let transport = Arc::new(EmbeddedTransport::new());
        let identity = NodeIdentity::generate(
            Some("home".to_string()),
            Some("svc".to_string()),
            Some(node_id.to_string()),
        );
        let info = NodeInfo::new(node_id, NodeRole::Worker);
        Arc::new(MembershipService::new(transport, identity, quick_config(), info))
    }

    fn remote(node_id: &str) -> NodeInfo {
        NodeInfo::new(node_id, NodeRole::Worker)
    }

    #[tokio::test]
    async fn test_observe_adds_member() {
        let svc = service("n1");
        svc.observe(remote("n2")).await;
        assert!(svc.get("n2").await.is_some());
        assert_eq!(svc.stats().await.online, 1);
    }

    #[tokio::test]
    async fn test_out_of_order_heartbeat_dropped() {
        let svc = service("n1");
        let mut newer = remote("n2");
        newer.last_seen = Utc::now();
        newer.load = 0.5;
        svc.observe(newer.clone()).await;

        let mut stale = remote("n2");
        stale.last_seen = newer.last_seen - chrono::Duration::seconds(10);
        stale.load = 0.9;
        svc.observe(stale).await;

        let cached = svc.get("n2").await.unwrap();
        assert!((cached.load - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_ages_members_to_offline() {
        let svc = service("n1");
        svc.observe(remote("n2")).await;

        tokio::time::advance(std::time::Duration::from_millis(80)).await;
        svc.sweep().await;
        assert_eq!(svc.get("n2").await.unwrap().status, NodeStatus::Suspicious);

        tokio::time::advance(std::time::Duration::from_millis(80)).await;
        svc.sweep().await;
        assert_eq!(svc.get("n2").await.unwrap().status, NodeStatus::Offline);
        assert_eq!(svc.offline_members().await.len(), 1);

        tokio::time::advance(std::time::Duration::from_millis(600)).await;
        svc.sweep().await;
        assert!(svc.get("n2").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_heartbeat_restores_online() {
        let svc = service("n1");
        svc.observe(remote("n2")).await;
        tokio::time::advance(std::time::Duration::from_millis(80)).await;
        svc.sweep().await;
        assert_eq!(svc.get("n2").await.unwrap().status, NodeStatus::Suspicious);

        svc.observe(remote("n2")).await;
        svc.sweep().await;
        assert_eq!(svc.get("n2").await.unwrap().status, NodeStatus::Online);
    }

    #[tokio::test]
    async fn test_fresher_heartbeat_never_downgrades() {
        let svc = service("n1");
        svc.observe(remote("n2")).await;
        // A second, fresher heartbeat keeps the node Online.
        svc.observe(remote("n2")).await;
        svc.sweep().await;
        assert_eq!(svc.get("n2").await.unwrap().status, NodeStatus::Online);
    }

    #[tokio::test]
    async fn test_task_counters_update_load_and_status() {
        let svc = service("n1");
        {
            let mut info = svc.self_info.write().await;
            info.max_tasks = 2;
        }
        svc.task_started().await;
        assert_eq!(svc.self_snapshot().await.status, NodeStatus::Online);
        svc.task_started().await;
        let snap = svc.self_snapshot().await;
        assert_eq!(snap.status, NodeStatus::Busy);
        assert!((snap.load - 1.0).abs() < f64::EPSILON);

        svc.task_finished().await;
        assert_eq!(svc.self_snapshot().await.status, NodeStatus::Online);
    }

    #[tokio::test]
    async fn test_drain_is_not_selectable() {
        let svc = service("n1");
        svc.drain().await;
        let snap = svc.self_snapshot().await;
        assert_eq!(snap.status, NodeStatus::Draining);
        assert!(!snap.status.is_selectable());
    }

    #[tokio::test]
    async fn test_gossip_flows_between_services_on_shared_transport() {
        let transport = Arc::new(EmbeddedTransport::new());
        let mk = |id: &str| {
            let identity = NodeIdentity::generate(
                Some("home".to_string()),
                Some("svc".to_string()),
                Some(id.to_string()),
            );
            Arc::new(MembershipService::new(
                Arc::clone(&transport) as Arc<dyn Transport>,
                identity,
                quick_config(),
                NodeInfo::new(id, NodeRole::Worker),
            ))
        };
        let a = mk("na");
        let b = mk("nb");
        a.start().await.unwrap();
        b.start().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        assert!(a.get("nb").await.is_some());
        assert!(b.get("na").await.is_some());
        a.stop();
        b.stop();
    }
}
