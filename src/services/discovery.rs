//! Worker discovery and selection.
//!
//! Chooses a dispatch target from the membership table by capability,
//! admission slack, load, and priority. Selection is deterministic so that
//! coordinators with the same member view pick the same target.

use std::sync::Arc;

use tracing::debug;

use crate::domain::models::node::NodeInfo;
use crate::domain::models::task::TaskPriority;
use crate::services::membership::MembershipService;

/// Load ceiling a critical task skips past.
const CRITICAL_LOAD_CEILING: f64 = 0.8;

/// Selects workers from the live member table.
pub struct DiscoveryService {
    membership: Arc<MembershipService>,
}

impl DiscoveryService {
    pub fn new(membership: Arc<MembershipService>) -> Self {
        Self { membership }
    }

    /// Pick a worker for the capability, or `None` when no member
    /// qualifies. The caller falls back to local execution on `None`.
    pub async fn select_worker(
        &self,
        capability: &str,
        priority: TaskPriority,
    ) -> Option<String> {
        let members = self.membership.selectable_members().await;
        // Coordinators do not consume dispatch subjects.
        let candidates: Vec<&NodeInfo> = members
            .iter()
            .filter(|m| m.role != crate::domain::models::node::NodeRole::Coordinator)
            .filter(|m| m.has_capability(capability))
            .filter(|m| m.has_slack())
            .collect();

        if candidates.is_empty() {
            debug!(capability, "no capable worker");
            return None;
        }

        // Critical work routes around heavily loaded nodes when a lighter
        // candidate exists at all.
        let pool: Vec<&NodeInfo> = if priority == TaskPriority::Critical {
            let light: Vec<&NodeInfo> = candidates
                .iter()
                .filter(|m| m.load <= CRITICAL_LOAD_CEILING)
                .copied()
                .collect();
            if light.is_empty() { candidates } else { light }
        } else {
            candidates
        };

        let winner = pool.into_iter().min_by(|a, b| {
            a.load
                .partial_cmp(&b.load)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        })?;

        debug!(capability, node_id = %winner.node_id, load = winner.load, "selected worker");
        Some(winner.node_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::MembershipConfig;
    use crate::domain::models::identity::NodeIdentity;
    use crate::domain::models::node::{NodeRole, NodeStatus};
    use crate::domain::ports::transport::Transport;
    use crate::infrastructure::transport::EmbeddedTransport;

    fn discovery() -> (Arc<MembershipService>, DiscoveryService) {
        let transport: Arc<dyn Transport> = Arc::new(EmbeddedTransport::new());
        let identity = NodeIdentity::generate(None, None, Some("self".to_string()));
        let membership = Arc::new(MembershipService::new(
            transport,
            identity,
            MembershipConfig::default(),
            NodeInfo::new("self", NodeRole::Coordinator),
        ));
        let discovery = DiscoveryService::new(Arc::clone(&membership));
        (membership, discovery)
    }

    fn worker(id: &str, caps: &[&str], load: f64, running: u32, max: u32) -> NodeInfo {
        let mut info = NodeInfo::new(id, NodeRole::Worker);
        info.capabilities = caps.iter().map(|c| (*c).to_string()).collect();
        info.load = load;
        info.tasks_running = running;
        info.max_tasks = max;
        info
    }

    #[tokio::test]
    async fn test_capability_match_is_strict() {
        let (membership, discovery) = discovery();
        membership.observe(worker("w-code", &["code"], 0.1, 0, 4)).await;
        membership.observe(worker("w-res", &["research"], 0.0, 0, 4)).await;

        let picked = discovery.select_worker("code", TaskPriority::Normal).await;
        assert_eq!(picked.as_deref(), Some("w-code"));
    }

    #[tokio::test]
    async fn test_general_matches_any_worker() {
        let (membership, discovery) = discovery();
        membership.observe(worker("w1", &["code"], 0.2, 0, 4)).await;
        let picked = discovery.select_worker("general", TaskPriority::Normal).await;
        assert_eq!(picked.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_lowest_load_wins() {
        let (membership, discovery) = discovery();
        membership.observe(worker("w1", &["code"], 0.6, 2, 4)).await;
        membership.observe(worker("w2", &["code"], 0.2, 1, 4)).await;
        let picked = discovery.select_worker("code", TaskPriority::Normal).await;
        assert_eq!(picked.as_deref(), Some("w2"));
    }

    #[tokio::test]
    async fn test_load_tie_breaks_by_node_id() {
        let (membership, discovery) = discovery();
        membership.observe(worker("w-b", &["code"], 0.5, 1, 4)).await;
        membership.observe(worker("w-a", &["code"], 0.5, 1, 4)).await;
        let picked = discovery.select_worker("code", TaskPriority::Normal).await;
        assert_eq!(picked.as_deref(), Some("w-a"));
    }

    #[tokio::test]
    async fn test_no_slack_excludes_node() {
        let (membership, discovery) = discovery();
        membership.observe(worker("w1", &["code"], 1.0, 4, 4)).await;
        assert!(discovery.select_worker("code", TaskPriority::Normal).await.is_none());
    }

    #[tokio::test]
    async fn test_max_tasks_zero_never_selected() {
        let (membership, discovery) = discovery();
        membership.observe(worker("w1", &["code"], 0.0, 0, 0)).await;
        assert!(discovery.select_worker("code", TaskPriority::Normal).await.is_none());
    }

    #[tokio::test]
    async fn test_critical_skips_loaded_nodes() {
        let (membership, discovery) = discovery();
        // w-a would win on node id, but carries too much load for critical.
        membership.observe(worker("w-a", &["code"], 0.9, 3, 4)).await;
        membership.observe(worker("w-b", &["code"], 0.95, 3, 4)).await;
        membership.observe(worker("w-c", &["code"], 0.5, 2, 4)).await;
        let picked = discovery.select_worker("code", TaskPriority::Critical).await;
        assert_eq!(picked.as_deref(), Some("w-c"));

        // Normal priority still takes the lowest load overall.
        let picked = discovery.select_worker("code", TaskPriority::Normal).await;
        assert_eq!(picked.as_deref(), Some("w-c"));
    }

    #[tokio::test]
    async fn test_critical_falls_back_when_all_loaded() {
        let (membership, discovery) = discovery();
        membership.observe(worker("w-a", &["code"], 0.9, 3, 4)).await;
        let picked = discovery.select_worker("code", TaskPriority::Critical).await;
        assert_eq!(picked.as_deref(), Some("w-a"));
    }

    #[tokio::test]
    async fn test_unselectable_statuses_excluded() {
        let (membership, discovery) = discovery();
        let mut draining = worker("w1", &["code"], 0.0, 0, 4);
        draining.status = NodeStatus::Draining;
        membership.observe(draining).await;
        assert!(discovery.select_worker("code", TaskPriority::Normal).await.is_none());
    }
}
