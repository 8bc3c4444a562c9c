//! Shrink scenarios: unhealthy members are retired without losing quorum

use etcdmgr::controller::{
    quorum, ClusterEvent, Controller, EventContext, Inventory, NodeRecord, UnhealthyNode,
};
use etcdmgr::store::{ClusterMember, CoordinationStore, MemoryStore, StoreCall};
use etcdmgr::ControllerConfig;
use std::sync::Arc;

const DESIRED: &str = "/rook/services/etcd/desired";

fn test_config() -> ControllerConfig {
    ControllerConfig {
        deploy_timeout_ms: 300,
        confirm_timeout_ms: 300,
        confirm_poll_interval_ms: 5,
        ..Default::default()
    }
}

fn cluster(nodes: &[(&str, &str)]) -> (Arc<MemoryStore>, Inventory) {
    let store = MemoryStore::with_members(
        nodes
            .iter()
            .map(|(id, ip)| ClusterMember::new(*id, *ip, 53379)),
    );
    let inv = nodes
        .iter()
        .map(|(id, ip)| NodeRecord::new(*id, *ip))
        .collect();
    (Arc::new(store), inv)
}

async fn seed_desired(store: &MemoryStore, nodes: &[(&str, &str)]) {
    for (id, ip) in nodes {
        store
            .set(&format!("{}/{}/ipaddress", DESIRED, id), ip)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_shrink_young_unhealthy_node_is_kept() {
    let (store, inv) = cluster(&[("a", "1.2.3.4"), ("b", "2.3.4.5"), ("c", "3.4.5.6")]);
    let mut controller = Controller::new(test_config()).unwrap();
    let mut reports = controller.subscribe_reports();
    controller.start_watch_events().unwrap();

    let context = EventContext::new(store.clone(), inv);
    controller
        .send(ClusterEvent::unhealthy_nodes(
            context,
            vec![UnhealthyNode::new("c", 10)],
        ))
        .unwrap();
    controller.wait_for_events().await.unwrap();

    assert_eq!(store.children(DESIRED).len(), 0);
    assert_eq!(store.members().len(), 3);
    assert!(!store.calls().iter().any(StoreCall::is_membership_change));
    assert!(reports.recv().await.unwrap().is_success());

    controller.close().await.unwrap();
}

#[tokio::test]
async fn test_shrink_removes_old_unhealthy_node() {
    let nodes = [("a", "1.2.3.4"), ("b", "2.3.4.5"), ("c", "3.4.5.6")];
    let (store, inv) = cluster(&nodes);
    seed_desired(&store, &nodes).await;

    let mut controller = Controller::new(test_config()).unwrap();
    let mut reports = controller.subscribe_reports();
    controller.start_watch_events().unwrap();

    let context = EventContext::new(store.clone(), inv);
    controller
        .send(ClusterEvent::unhealthy_nodes(
            context,
            vec![UnhealthyNode::new("c", 120)],
        ))
        .unwrap();
    controller.wait_for_events().await.unwrap();

    let desired = store.children(DESIRED);
    assert_eq!(desired.len(), 2);
    assert!(!desired.contains("c"));
    assert!(store.members().iter().all(|m| m.node_id != "c"));

    let report = reports.recv().await.unwrap();
    assert_eq!(report.removed, vec!["c".to_string()]);
    assert!(report.is_success());

    controller.close().await.unwrap();
}

#[tokio::test]
async fn test_shrink_stops_at_quorum() {
    let (store, inv) = cluster(&[
        ("a", "10.0.0.1"),
        ("b", "10.0.0.2"),
        ("c", "10.0.0.3"),
        ("d", "10.0.0.4"),
        ("e", "10.0.0.5"),
    ]);
    let mut controller = Controller::new(test_config()).unwrap();
    let mut reports = controller.subscribe_reports();
    controller.start_watch_events().unwrap();

    let context = EventContext::new(store.clone(), inv);
    controller
        .send(ClusterEvent::unhealthy_nodes(
            context,
            vec![
                UnhealthyNode::new("e", 300),
                UnhealthyNode::new("d", 300),
                UnhealthyNode::new("c", 300),
            ],
        ))
        .unwrap();
    controller.wait_for_events().await.unwrap();

    let members = store.members();
    assert_eq!(members.len(), 3);
    assert!(members.len() >= quorum(5));
    assert!(members.iter().any(|m| m.node_id == "c"));

    let report = reports.recv().await.unwrap();
    assert_eq!(report.removed, vec!["e".to_string(), "d".to_string()]);
    let rejected: Vec<_> = report.failures_of("quorum_violation").collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].node_id.as_deref(), Some("c"));

    controller.close().await.unwrap();
}

#[tokio::test]
async fn test_shrink_two_member_cluster_keeps_both() {
    let (store, inv) = cluster(&[("a", "1.2.3.4"), ("b", "2.3.4.5")]);
    let mut controller = Controller::new(test_config()).unwrap();
    let mut reports = controller.subscribe_reports();
    controller.start_watch_events().unwrap();

    let context = EventContext::new(store.clone(), inv);
    controller
        .send(ClusterEvent::unhealthy_nodes(
            context,
            vec![UnhealthyNode::new("b", 600)],
        ))
        .unwrap();
    controller.wait_for_events().await.unwrap();

    assert_eq!(store.members().len(), 2);
    let report = reports.recv().await.unwrap();
    assert!(report.removed.is_empty());
    assert_eq!(report.failures_of("quorum_violation").count(), 1);

    controller.close().await.unwrap();
}

#[tokio::test]
async fn test_shrink_replaces_removed_member() {
    let (store, mut inv) = cluster(&[("a", "10.0.0.1"), ("b", "10.0.0.2"), ("c", "10.0.0.3")]);
    inv.insert(NodeRecord::new("d", "10.0.0.4"));
    store.add_watch_response("/rook/_notify/d/etcd/status", "succeeded");

    let config = ControllerConfig {
        target_cluster_size: Some(3),
        ..test_config()
    };
    let mut controller = Controller::new(config).unwrap();
    let mut reports = controller.subscribe_reports();
    controller.start_watch_events().unwrap();

    let context = EventContext::new(store.clone(), inv);
    controller
        .send(ClusterEvent::unhealthy_nodes(
            context,
            vec![UnhealthyNode::new("c", 120)],
        ))
        .unwrap();
    controller.wait_for_events().await.unwrap();

    let ids: Vec<_> = store.members().into_iter().map(|m| m.node_id).collect();
    assert_eq!(ids, vec!["a", "b", "d"]);
    assert_eq!(
        store.value(&format!("{}/d/ipaddress", DESIRED)).as_deref(),
        Some("10.0.0.4")
    );

    let report = reports.recv().await.unwrap();
    assert_eq!(report.removed, vec!["c".to_string()]);
    assert_eq!(report.deployed, vec!["d".to_string()]);

    controller.close().await.unwrap();
}
