//! Leader election: deterministic smallest-id-wins over the live members.
//!
//! Every node runs the same rule against its own member view, so nodes
//! with a converged view agree without any vote traffic. Split views elect
//! local leaders and reconcile when the views merge; this is deliberately
//! weaker than consensus, which role assignment does not need.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::domain::error::{SwarmError, SwarmResult};
use crate::domain::models::config::ElectionConfig;
use crate::domain::models::node::NodeStatus;
use crate::domain::ports::transport::Transport;
use crate::infrastructure::transport::subjects;
use crate::services::membership::MembershipService;

/// Capacity of the leader-change channel; drops beyond it are tolerated
/// because subsequent ticks reconverge.
const CHANGE_CHANNEL_CAPACITY: usize = 10;

/// Poll cadence of `elect_leader`.
const ELECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Published on the election subject whenever a node's view of the leader
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderChange {
    pub leader: String,
    /// Node that observed the change.
    pub observer: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ElectionState {
    current_leader: Option<String>,
    is_leader: bool,
}

/// Runs the election tick and the leader liveness monitor.
pub struct ElectionService {
    transport: Arc<dyn Transport>,
    membership: Arc<MembershipService>,
    config: ElectionConfig,
    state: RwLock<ElectionState>,
    changes_tx: mpsc::Sender<LeaderChange>,
    changes_rx: Mutex<Option<mpsc::Receiver<LeaderChange>>>,
    shutdown: watch::Sender<bool>,
}

impl ElectionService {
    pub fn new(
        transport: Arc<dyn Transport>,
        membership: Arc<MembershipService>,
        config: ElectionConfig,
    ) -> Self {
        let (changes_tx, changes_rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            transport,
            membership,
            config,
            state: RwLock::new(ElectionState::default()),
            changes_tx,
            changes_rx: Mutex::new(Some(changes_rx)),
            shutdown: watch::channel(false).0,
        }
    }

    /// Take the leader-change receiver. Single consumer; later calls get `None`.
    pub async fn changes(&self) -> Option<mpsc::Receiver<LeaderChange>> {
        self.changes_rx.lock().await.take()
    }

    pub async fn leader(&self) -> Option<String> {
        self.state.read().await.current_leader.clone()
    }

    pub async fn is_leader(&self) -> bool {
        self.state.read().await.is_leader
    }

    /// Start the periodic election tick and leader monitor.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("election disabled; node keeps its configured role");
            return;
        }
        let tick_interval = Duration::from_millis(self.config.election_interval_ms);
        let monitor_interval = Duration::from_millis(self.config.leader_heartbeat_timeout_ms);

        let service = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(tick_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => service.tick().await,
                    _ = shutdown.changed() => break,
                }
            }
        });

        let service = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(monitor_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => service.monitor().await,
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// One election round: smallest Online node id wins.
    pub async fn tick(&self) {
        let mut ids: Vec<String> = self
            .membership
            .alive_members()
            .await
            .into_iter()
            .map(|m| m.node_id)
            .collect();

        // Our own snapshot may not have round-tripped the transport yet.
        let own = self.membership.self_snapshot().await;
        if own.status == NodeStatus::Online {
            let self_id = self.membership.node_id().to_string();
            if !ids.contains(&self_id) {
                ids.push(self_id);
            }
        }

        let Some(candidate) = ids.into_iter().min() else {
            return;
        };

        let changed = {
            let mut state = self.state.write().await;
            if state.current_leader.as_deref() == Some(candidate.as_str()) {
                false
            } else {
                state.current_leader = Some(candidate.clone());
                state.is_leader = candidate == self.membership.node_id();
                true
            }
        };

        if changed {
            let is_self = candidate == self.membership.node_id();
            if is_self {
                info!(leader = %candidate, "assumed leadership");
            } else {
                info!(leader = %candidate, "following new leader");
            }
            self.announce_change(candidate).await;
        }
    }

    /// Clear a dead leader so the next tick re-elects.
    pub async fn monitor(&self) {
        let Some(leader) = self.leader().await else {
            return;
        };
        if leader == self.membership.node_id() {
            return;
        }
        let alive = self
            .membership
            .get(&leader)
            .await
            .is_some_and(|info| info.status == NodeStatus::Online);
        if !alive {
            warn!(%leader, "leader lost; re-electing");
            {
                let mut state = self.state.write().await;
                state.current_leader = None;
                state.is_leader = false;
            }
            self.tick().await;
        }
    }

    /// Clear state and block until a leader is known.
    ///
    /// Polls every 100 ms, bounded by `deadline`.
    pub async fn elect_leader(&self, deadline: Duration) -> SwarmResult<String> {
        {
            let mut state = self.state.write().await;
            state.current_leader = None;
            state.is_leader = false;
        }
        self.tick().await;

        let poll = async {
            loop {
                if let Some(leader) = self.leader().await {
                    return leader;
                }
                tokio::time::sleep(ELECT_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(deadline, poll)
            .await
            .map_err(|_| SwarmError::Cancelled)
    }

    async fn announce_change(&self, leader: String) {
        let change = LeaderChange {
            leader,
            observer: self.membership.node_id().to_string(),
            observed_at: Utc::now(),
        };

        if let Err(err) = self.changes_tx.try_send(change.clone()) {
            // Bounded channel: dropping is safe, later ticks reconverge.
            debug!(%err, "leader change listener lagging; dropping notification");
        }

        let subject = subjects::election(&self.membership.identity().hid);
        match serde_json::to_vec(&change) {
            Ok(payload) => {
                if let Err(err) = self.transport.publish(&subject, payload).await {
                    warn!(%err, "failed to publish leader change");
                }
            }
            Err(err) => warn!(%err, "failed to encode leader change"),
        }
    }
}
