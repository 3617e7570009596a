//! Membership and election integration tests.
//!
//! Runs several node stacks on one shared embedded transport and checks
//! gossip convergence, leader agreement, and leader failover with role
//! switching.

mod common;

use std::sync::Arc;
use std::time::Duration;

use nydus::domain::models::config::ElectionConfig;
use nydus::domain::models::identity::NodeIdentity;
use nydus::domain::models::node::{NodeInfo, NodeRole};
use nydus::domain::ports::transport::Transport;
use nydus::infrastructure::transport::EmbeddedTransport;
use nydus::services::{
    Coordinator, DiscoveryService, ElectionService, LifecycleStore, MembershipService, RoleSwitcher,
};

use common::{quick_membership_config, spawn_worker, wait_for, EchoAgent, NullBus, ScriptedChat};

fn quick_election_config() -> ElectionConfig {
    ElectionConfig {
        enabled: true,
        election_interval_ms: 60,
        leader_heartbeat_timeout_ms: 120,
        lease_duration_ms: 1_000,
    }
}

struct ElectionStack {
    membership: Arc<MembershipService>,
    election: Arc<ElectionService>,
}

async fn spawn_election_node(transport: &Arc<EmbeddedTransport>, node_id: &str) -> ElectionStack {
    let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
    let identity = NodeIdentity::generate(
        Some("home".to_string()),
        Some("svc".to_string()),
        Some(node_id.to_string()),
    );
    let membership = Arc::new(MembershipService::new(
        Arc::clone(&transport),
        identity,
        quick_membership_config(),
        NodeInfo::new(node_id, NodeRole::Worker),
    ));
    membership.start().await.expect("membership start");
    let election = Arc::new(ElectionService::new(
        transport,
        Arc::clone(&membership),
        quick_election_config(),
    ));
    election.start();
    ElectionStack {
        membership,
        election,
    }
}

#[tokio::test]
async fn test_gossip_converges_across_three_nodes() {
    let transport = Arc::new(EmbeddedTransport::new());
    let nodes = [
        spawn_election_node(&transport, "n1").await,
        spawn_election_node(&transport, "n2").await,
        spawn_election_node(&transport, "n3").await,
    ];

    let converged = wait_for(Duration::from_secs(2), || async {
        for node in &nodes {
            if node.membership.members().await.len() < 3 {
                return false;
            }
        }
        true
    })
    .await;
    assert!(converged, "every node should see all three members");

    for node in &nodes {
        node.election.stop();
        node.membership.stop();
    }
}

#[tokio::test]
async fn test_all_nodes_agree_on_smallest_leader() {
    let transport = Arc::new(EmbeddedTransport::new());
    let nodes = [
        spawn_election_node(&transport, "n3").await,
        spawn_election_node(&transport, "n1").await,
        spawn_election_node(&transport, "n2").await,
    ];

    let agreed = wait_for(Duration::from_secs(2), || async {
        for node in &nodes {
            if node.election.leader().await.as_deref() != Some("n1") {
                return false;
            }
        }
        true
    })
    .await;
    assert!(agreed, "all nodes should elect n1");
    assert!(nodes[1].election.is_leader().await);
    assert!(!nodes[0].election.is_leader().await);

    for node in &nodes {
        node.election.stop();
        node.membership.stop();
    }
}

#[tokio::test]
async fn test_leader_failover_promotes_next_node_and_switches_roles() {
    let transport = Arc::new(EmbeddedTransport::new());
    let n1 = spawn_election_node(&transport, "n1").await;
    let n2 = spawn_election_node(&transport, "n2").await;
    let n3 = spawn_election_node(&transport, "n3").await;

    // Wire n2's role switcher to its election stream.
    let t: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
    let lifecycle = Arc::new(LifecycleStore::new(Arc::clone(&t), "n2"));
    lifecycle.init().await.unwrap();
    let discovery = Arc::new(DiscoveryService::new(Arc::clone(&n2.membership)));
    let agent = EchoAgent::instant();
    let chat = ScriptedChat::new(vec![]);
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&t),
        Arc::clone(&n2.membership),
        discovery,
        Arc::clone(&lifecycle),
        agent.clone(),
        chat,
        None,
        true,
        "m".to_string(),
    ));
    let switcher = Arc::new(RoleSwitcher::new(
        t,
        agent,
        lifecycle,
        Arc::clone(&n2.membership),
        coordinator,
        Arc::new(NullBus),
        NodeRole::Worker,
        vec![],
        2,
    ));
    let changes = n2.election.changes().await.expect("change stream");
    switcher.watch_changes(changes);

    // n1 leads at first; n2 runs as a worker.
    let settled = wait_for(Duration::from_secs(2), || async {
        n2.election.leader().await.as_deref() == Some("n1")
            && switcher.current_role().await == Some(NodeRole::Worker)
    })
    .await;
    assert!(settled, "n1 should lead and n2 should be a worker");

    // n1 stops heartbeating entirely.
    n1.election.stop();
    n1.membership.stop();

    // Within the offline window plus an election tick, n2 takes over.
    let promoted = wait_for(Duration::from_secs(3), || async {
        n2.election.is_leader().await
            && n3.election.leader().await.as_deref() == Some("n2")
            && switcher.current_role().await == Some(NodeRole::Coordinator)
    })
    .await;
    assert!(promoted, "n2 should lead, n3 should follow, and n2's coordinator should start");

    switcher.stop().await;
    for node in [&n2, &n3] {
        node.election.stop();
        node.membership.stop();
    }
}

#[tokio::test]
async fn test_worker_stack_membership_advertises_capabilities() {
    let transport = Arc::new(EmbeddedTransport::new());
    let observer = spawn_election_node(&transport, "obs").await;
    let worker = spawn_worker(&transport, "w-code", &["code"], 2).await;

    let seen = wait_for(Duration::from_secs(2), || async {
        observer
            .membership
            .get("w-code")
            .await
            .is_some_and(|info| info.capabilities == vec!["code".to_string()])
    })
    .await;
    assert!(seen, "observer should learn worker capabilities via gossip");

    worker.stop();
    observer.election.stop();
    observer.membership.stop();
}
