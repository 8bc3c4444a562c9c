//! Membership planner
//!
//! Pure decision logic: given the inventory, a snapshot of the cluster
//! (desired state and live members) and an event, compute the next desired
//! state and the actions that get there. Nothing here touches the store.
//!
//! The effective membership is the union of live members and desired-state
//! entries. Grow decisions fill it up to the target size; shrink decisions
//! remove members that stayed unhealthy past the age threshold, limited to
//! the largest prefix of the batch that keeps a majority of live members.

use crate::common::{ControllerConfig, Error};
use crate::controller::event::{ClusterEventKind, Inventory, UnhealthyNode};
use crate::controller::quorum::max_removals;
use crate::store::ClusterMember;
use std::collections::{BTreeMap, BTreeSet};

/// Desired state: node ID → IP address
pub type DesiredState = BTreeMap<String, String>;

/// Cluster snapshot taken at the start of an event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterView {
    pub desired: DesiredState,
    pub live: Vec<ClusterMember>,
}

impl ClusterView {
    pub fn is_live(&self, node_id: &str) -> bool {
        self.live.iter().any(|m| m.node_id == node_id)
    }

    /// Live members ∪ desired entries
    pub fn effective_members(&self) -> BTreeSet<&str> {
        self.live
            .iter()
            .map(|m| m.node_id.as_str())
            .chain(self.desired.keys().map(String::as_str))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployAction {
    pub node_id: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveAction {
    pub node_id: String,
    /// Whether the node is in the live membership list (or only desired)
    pub live: bool,
}

/// Why a proposed action was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    TargetReached { node_id: String, target: usize },
    UnknownNode { node_id: String },
    QuorumViolation {
        node_id: String,
        live: usize,
        requested: usize,
        allowed: usize,
    },
}

impl Rejection {
    pub fn node_id(&self) -> &str {
        match self {
            Rejection::TargetReached { node_id, .. }
            | Rejection::UnknownNode { node_id }
            | Rejection::QuorumViolation { node_id, .. } => node_id,
        }
    }

    pub fn to_error(&self) -> Error {
        match self {
            Rejection::TargetReached { node_id, target } => Error::Planning(format!(
                "cluster already at target size {}, {} not added",
                target, node_id
            )),
            Rejection::UnknownNode { node_id } => {
                Error::Planning(format!("{} is not in the inventory", node_id))
            }
            Rejection::QuorumViolation {
                live,
                requested,
                allowed,
                ..
            } => Error::QuorumViolation {
                live: *live,
                requested: *requested,
                allowed: *allowed,
            },
        }
    }
}

/// Output of one planning pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub next_desired: DesiredState,
    pub deploys: Vec<DeployAction>,
    pub removals: Vec<RemoveAction>,
    pub rejections: Vec<Rejection>,
}

impl Plan {
    fn unchanged(view: &ClusterView) -> Self {
        Self {
            next_desired: view.desired.clone(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deploys.is_empty() && self.removals.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Planner {
    config: ControllerConfig,
}

impl Planner {
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    pub fn plan(&self, inventory: &Inventory, view: &ClusterView, event: &ClusterEventKind) -> Plan {
        match event {
            ClusterEventKind::AddNode { node_id } => self.plan_grow(inventory, view, node_id),
            ClusterEventKind::UnhealthyNodes { nodes } => self.plan_shrink(inventory, view, nodes),
        }
    }

    fn plan_grow(&self, inventory: &Inventory, view: &ClusterView, node_id: &str) -> Plan {
        let mut plan = Plan::unchanged(view);
        let effective = view.effective_members();
        if effective.contains(node_id) {
            return plan;
        }
        if !inventory.contains(node_id) {
            plan.rejections.push(Rejection::UnknownNode {
                node_id: node_id.to_string(),
            });
            return plan;
        }

        let target = self.config.target_size(inventory.len());
        let need = target.saturating_sub(effective.len());
        if need == 0 {
            plan.rejections.push(Rejection::TargetReached {
                node_id: node_id.to_string(),
                target,
            });
            return plan;
        }

        // The event's node goes first, then the rest of the inventory in order
        let candidates = std::iter::once(node_id).chain(inventory.iter().map(|n| n.node_id.as_str()));
        self.fill(inventory, &effective, candidates, need, &BTreeSet::new(), &mut plan);
        plan
    }

    fn plan_shrink(&self, inventory: &Inventory, view: &ClusterView, unhealthy: &[UnhealthyNode]) -> Plan {
        let mut plan = Plan::unchanged(view);
        let effective = view.effective_members();
        let threshold = self.config.unhealthy_age_threshold();

        let mut eligible: Vec<&str> = Vec::new();
        for node in unhealthy {
            let id = node.node_id.as_str();
            if !effective.contains(id) || eligible.contains(&id) {
                continue;
            }
            if node.age() <= threshold {
                tracing::debug!(
                    "{} unhealthy for {:?}, not past {:?}",
                    id,
                    node.age(),
                    threshold
                );
                continue;
            }
            eligible.push(id);
        }

        let live_count = view.live.len();
        let requested = eligible.iter().filter(|id| view.is_live(id)).count();
        let mut allowed = max_removals(live_count);
        for id in eligible {
            let live = view.is_live(id);
            if live {
                if allowed == 0 {
                    plan.rejections.push(Rejection::QuorumViolation {
                        node_id: id.to_string(),
                        live: live_count,
                        requested,
                        allowed: max_removals(live_count),
                    });
                    continue;
                }
                allowed -= 1;
            }
            plan.next_desired.remove(id);
            plan.removals.push(RemoveAction {
                node_id: id.to_string(),
                live,
            });
        }

        if !plan.removals.is_empty() {
            let remaining: BTreeSet<&str> = effective
                .iter()
                .copied()
                .filter(|id| !plan.removals.iter().any(|r| r.node_id == *id))
                .collect();
            let target = self.config.target_size(inventory.len());
            let need = target.saturating_sub(remaining.len());
            let excluded: BTreeSet<&str> = unhealthy.iter().map(|n| n.node_id.as_str()).collect();
            let candidates: Vec<&str> = inventory.iter().map(|n| n.node_id.as_str()).collect();
            self.fill(inventory, &effective, candidates.into_iter(), need, &excluded, &mut plan);
        }

        plan
    }

    /// Select up to `need` deploy candidates, in the order given
    fn fill<'a>(
        &self,
        inventory: &Inventory,
        effective: &BTreeSet<&str>,
        candidates: impl Iterator<Item = &'a str>,
        need: usize,
        excluded: &BTreeSet<&str>,
        plan: &mut Plan,
    ) {
        for id in candidates {
            if plan.deploys.len() >= need {
                break;
            }
            if effective.contains(id)
                || excluded.contains(id)
                || plan.deploys.iter().any(|d| d.node_id == id)
            {
                continue;
            }
            let Some(node) = inventory.get(id) else {
                continue;
            };
            plan.next_desired
                .insert(node.node_id.clone(), node.ip_address.clone());
            plan.deploys.push(DeployAction {
                node_id: node.node_id.clone(),
                address: node.ip_address.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::event::NodeRecord;

    fn inventory(nodes: &[(&str, &str)]) -> Inventory {
        nodes
            .iter()
            .map(|(id, ip)| NodeRecord::new(*id, *ip))
            .collect()
    }

    fn view(live: &[&str], desired: &[(&str, &str)]) -> ClusterView {
        ClusterView {
            live: live
                .iter()
                .map(|id| ClusterMember::new(*id, format!("ip-{}", id), 53379))
                .collect(),
            desired: desired
                .iter()
                .map(|(id, ip)| (id.to_string(), ip.to_string()))
                .collect(),
        }
    }

    fn abc() -> Inventory {
        inventory(&[("a", "1.2.3.4"), ("b", "2.3.4.5"), ("c", "3.4.5.6")])
    }

    fn add(id: &str) -> ClusterEventKind {
        ClusterEventKind::AddNode {
            node_id: id.to_string(),
        }
    }

    fn unhealthy(nodes: &[(&str, u64)]) -> ClusterEventKind {
        ClusterEventKind::UnhealthyNodes {
            nodes: nodes
                .iter()
                .map(|(id, age)| UnhealthyNode::new(*id, *age))
                .collect(),
        }
    }

    #[test]
    fn test_grow_fills_to_target() {
        let planner = Planner::new(ControllerConfig::default());
        let plan = planner.plan(&abc(), &view(&["a"], &[]), &add("b"));

        assert_eq!(plan.next_desired.len(), 2);
        assert_eq!(plan.next_desired.get("b").unwrap(), "2.3.4.5");
        assert_eq!(plan.next_desired.get("c").unwrap(), "3.4.5.6");
        let order: Vec<_> = plan.deploys.iter().map(|d| d.node_id.as_str()).collect();
        assert_eq!(order, vec!["b", "c"]);
        assert!(plan.removals.is_empty());
    }

    #[test]
    fn test_grow_event_node_first() {
        let config = ControllerConfig {
            target_cluster_size: Some(3),
            ..Default::default()
        };
        let planner = Planner::new(config);
        let inv = inventory(&[
            ("a", "1.2.3.4"),
            ("b", "2.3.4.5"),
            ("c", "3.4.5.6"),
            ("d", "4.5.6.7"),
        ]);
        let plan = planner.plan(&inv, &view(&["a", "b"], &[]), &add("d"));

        assert_eq!(plan.deploys.len(), 1);
        assert_eq!(plan.deploys[0].node_id, "d");
    }

    #[test]
    fn test_grow_at_target_is_rejected() {
        let planner = Planner::new(ControllerConfig::default());
        let inv = inventory(&[
            ("a", "1.2.3.4"),
            ("b", "2.3.4.5"),
            ("c", "3.4.5.6"),
            ("d", "4.5.6.7"),
        ]);
        let plan = planner.plan(&inv, &view(&["a", "b"], &[("c", "3.4.5.6")]), &add("d"));

        assert!(plan.is_empty());
        assert_eq!(plan.next_desired.len(), 1);
        assert!(matches!(
            plan.rejections.as_slice(),
            [Rejection::TargetReached { target: 3, .. }]
        ));
    }

    #[test]
    fn test_grow_unknown_or_existing_node() {
        let planner = Planner::new(ControllerConfig::default());

        let plan = planner.plan(&abc(), &view(&["a"], &[]), &add("zz"));
        assert!(plan.is_empty());
        assert_eq!(plan.rejections[0].node_id(), "zz");

        let plan = planner.plan(&abc(), &view(&["a"], &[("b", "2.3.4.5")]), &add("b"));
        assert!(plan.is_empty());
        assert!(plan.rejections.is_empty());
    }

    #[test]
    fn test_grow_never_exceeds_target() {
        let planner = Planner::new(ControllerConfig::default());
        let inv = inventory(&[
            ("a", "1"),
            ("b", "2"),
            ("c", "3"),
            ("d", "4"),
            ("e", "5"),
            ("f", "6"),
            ("g", "7"),
        ]);
        let target = ControllerConfig::default().target_size(inv.len());

        let mut current = view(&["a"], &[]);
        for node in inv.iter() {
            let plan = planner.plan(&inv, &current, &add(&node.node_id));
            assert!(plan.next_desired.len() <= target);
            current.desired = plan.next_desired;
            assert!(current.effective_members().len() <= target);
        }
        assert_eq!(current.effective_members().len(), target);
    }

    #[test]
    fn test_plan_is_idempotent() {
        let planner = Planner::new(ControllerConfig::default());
        let inv = abc();
        let current = view(&["a", "b", "c"], &[("b", "2.3.4.5")]);
        for event in [add("b"), add("c"), unhealthy(&[("c", 120), ("b", 300)])] {
            let first = planner.plan(&inv, &current, &event);
            let second = planner.plan(&inv, &current, &event);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_shrink_below_threshold_is_ignored() {
        let planner = Planner::new(ControllerConfig::default());
        let plan = planner.plan(&abc(), &view(&["a", "b", "c"], &[]), &unhealthy(&[("c", 10)]));

        assert!(plan.is_empty());
        assert!(plan.rejections.is_empty());
        assert!(plan.next_desired.is_empty());
    }

    #[test]
    fn test_shrink_removes_past_threshold() {
        let planner = Planner::new(ControllerConfig::default());
        let current = view(&["a", "b", "c"], &[("c", "3.4.5.6")]);
        let plan = planner.plan(&abc(), &current, &unhealthy(&[("c", 61)]));

        assert_eq!(
            plan.removals,
            vec![RemoveAction {
                node_id: "c".into(),
                live: true
            }]
        );
        assert!(!plan.next_desired.contains_key("c"));
        // nothing healthy left to replace it with
        assert!(plan.deploys.is_empty());
    }

    #[test]
    fn test_shrink_threshold_is_exclusive() {
        let config = ControllerConfig {
            unhealthy_age_threshold_secs: 30,
            ..Default::default()
        };
        let planner = Planner::new(config);
        let current = view(&["a", "b", "c"], &[("c", "3.4.5.6")]);

        let at = planner.plan(&abc(), &current, &unhealthy(&[("c", 30)]));
        assert!(at.removals.is_empty());
        assert!(at.rejections.is_empty());
        assert!(at.next_desired.contains_key("c"));

        let past = planner.plan(&abc(), &current, &unhealthy(&[("c", 31)]));
        let removed: Vec<_> = past.removals.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(removed, vec!["c"]);
    }

    #[test]
    fn test_shrink_keeps_largest_safe_prefix() {
        let planner = Planner::new(ControllerConfig::default());
        let inv = inventory(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")]);
        let current = view(&["a", "b", "c", "d", "e"], &[]);
        let plan = planner.plan(&inv, &current, &unhealthy(&[("e", 100), ("d", 100), ("c", 100)]));

        let removed: Vec<_> = plan.removals.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(removed, vec!["e", "d"]);
        assert_eq!(plan.rejections.len(), 1);
        assert_eq!(
            plan.rejections[0],
            Rejection::QuorumViolation {
                node_id: "c".into(),
                live: 5,
                requested: 3,
                allowed: 2
            }
        );
    }

    #[test]
    fn test_shrink_two_member_cluster_is_rejected() {
        let planner = Planner::new(ControllerConfig::default());
        let plan = planner.plan(&abc(), &view(&["a", "b"], &[]), &unhealthy(&[("b", 100)]));

        assert!(plan.removals.is_empty());
        assert!(matches!(
            plan.rejections[0].to_error(),
            Error::QuorumViolation { live: 2, .. }
        ));
    }

    #[test]
    fn test_shrink_desired_only_node_skips_quorum() {
        let planner = Planner::new(ControllerConfig::default());
        let plan = planner.plan(&abc(), &view(&["a"], &[("b", "2.3.4.5")]), &unhealthy(&[("b", 100)]));

        assert_eq!(
            plan.removals,
            vec![RemoveAction {
                node_id: "b".into(),
                live: false
            }]
        );
        assert!(plan.rejections.is_empty());
    }

    #[test]
    fn test_shrink_plans_replacement() {
        let planner = Planner::new(ControllerConfig::default());
        let inv = inventory(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]);
        let plan = planner.plan(&inv, &view(&["a", "b", "c"], &[]), &unhealthy(&[("c", 100), ("d", 5)]));

        assert_eq!(plan.removals.len(), 1);
        // d is unhealthy too, so no replacement is picked
        assert!(plan.deploys.is_empty());

        let inv = inventory(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5"), ("f", "6")]);
        let config = ControllerConfig {
            target_cluster_size: Some(3),
            ..Default::default()
        };
        let plan = Planner::new(config).plan(&inv, &view(&["a", "b", "c"], &[]), &unhealthy(&[("c", 100)]));
        assert_eq!(plan.deploys.len(), 1);
        assert_eq!(plan.deploys[0].node_id, "d");
        assert_eq!(plan.next_desired.get("d").map(String::as_str), Some("4"));
    }
}
