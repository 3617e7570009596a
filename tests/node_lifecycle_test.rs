//! Swarm node assembly tests: build, start, elect, drain, stop.

mod common;

use std::sync::Arc;
use std::time::Duration;

use nydus::domain::models::config::SwarmConfig;
use nydus::domain::models::node::NodeRole;
use nydus::{EmbeddedTransport, NodeDeps, SwarmNode};

use common::{wait_for, EchoAgent, NullBus, ScriptedChat};

fn fast_config(node_id: &str, role: NodeRole) -> SwarmConfig {
    let mut config = SwarmConfig::default();
    config.hid = "home".to_string();
    config.sid = "svc".to_string();
    config.node_id = node_id.to_string();
    config.role = role;
    config.membership = common::quick_membership_config();
    config.election.election_interval_ms = 60;
    config.election.leader_heartbeat_timeout_ms = 120;
    config.failover.scan_interval_ms = 200;
    config
}

fn deps(transport: &Arc<EmbeddedTransport>) -> NodeDeps {
    NodeDeps {
        transport: Arc::clone(transport) as Arc<dyn nydus::domain::ports::transport::Transport>,
        agent: EchoAgent::instant(),
        chat: ScriptedChat::new(vec![]),
        bus: Arc::new(NullBus),
        workflow_runner: None,
        authorizer: None,
    }
}

#[tokio::test]
async fn test_single_node_elects_itself_and_runs_configured_role() {
    let transport = Arc::new(EmbeddedTransport::new());
    let node = SwarmNode::build(&fast_config("n1", NodeRole::Worker), deps(&transport))
        .await
        .unwrap();
    node.start().await.unwrap();

    let leader = node.elect_leader(Duration::from_secs(2)).await.unwrap();
    assert_eq!(leader, "n1");
    assert!(node.is_leader().await);

    // Election promotes the sole node to coordinator.
    let promoted = wait_for(Duration::from_secs(2), || async {
        node.current_role().await == Some(NodeRole::Coordinator)
    })
    .await;
    assert!(promoted, "sole node should switch to the coordinator role");

    node.stop().await;
}

#[tokio::test]
async fn test_two_nodes_split_leader_and_worker_roles() {
    let transport = Arc::new(EmbeddedTransport::new());
    let n1 = SwarmNode::build(&fast_config("n1", NodeRole::Worker), deps(&transport))
        .await
        .unwrap();
    let n2 = SwarmNode::build(&fast_config("n2", NodeRole::Worker), deps(&transport))
        .await
        .unwrap();
    n1.start().await.unwrap();
    n2.start().await.unwrap();

    let settled = wait_for(Duration::from_secs(3), || async {
        n1.leader().await.as_deref() == Some("n1")
            && n2.leader().await.as_deref() == Some("n1")
            && n1.current_role().await == Some(NodeRole::Coordinator)
            && n2.current_role().await == Some(NodeRole::Worker)
    })
    .await;
    assert!(settled, "n1 should coordinate while n2 works");

    n1.stop().await;
    n2.stop().await;
}

#[tokio::test]
async fn test_drain_is_advertised() {
    let transport = Arc::new(EmbeddedTransport::new());
    let node = SwarmNode::build(&fast_config("n1", NodeRole::Worker), deps(&transport))
        .await
        .unwrap();
    node.start().await.unwrap();
    node.drain().await;

    // The next heartbeat carries Draining; our own table reflects it.
    let observer = SwarmNode::build(&fast_config("n2", NodeRole::Worker), deps(&transport))
        .await
        .unwrap();
    observer.start().await.unwrap();
    let seen = wait_for(Duration::from_secs(2), || async {
        observer.membership_stats().await.draining == 1
    })
    .await;
    assert!(seen, "peers should observe the draining status");

    node.stop().await;
    observer.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let transport = Arc::new(EmbeddedTransport::new());
    let node = SwarmNode::build(&fast_config("n1", NodeRole::Worker), deps(&transport))
        .await
        .unwrap();
    node.start().await.unwrap();
    node.stop().await;
    // Second stop must be a no-op, not a panic or error.
    node.stop().await;
}

#[tokio::test]
async fn test_statuses_are_observable() {
    let transport = Arc::new(EmbeddedTransport::new());
    let node = SwarmNode::build(&fast_config("n1", NodeRole::Specialist), deps(&transport))
        .await
        .unwrap();
    node.start().await.unwrap();

    assert_eq!(node.identity().node_id, "n1");
    assert_eq!(node.current_role().await, Some(NodeRole::Specialist));

    let self_seen = wait_for(Duration::from_secs(2), || async {
        node.membership_stats().await.online >= 1
    })
    .await;
    assert!(self_seen, "own heartbeat should land in the member table");

    node.stop().await;
}
