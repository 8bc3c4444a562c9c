//! Membership controller
//!
//! The controller is responsible for:
//! - Serializing cluster events through a single worker
//! - Planning grow and shrink decisions against the target size
//! - Deploying new members and waiting for their agents
//! - Keeping live membership changes quorum-safe and one at a time

pub mod deploy;
pub mod event;
pub mod event_loop;
pub mod planner;
pub mod quorum;
pub mod report;

pub use deploy::{DeploymentCoordinator, NotificationStatus};
pub use event::{ClusterEvent, ClusterEventKind, EventContext, Inventory, NodeRecord, UnhealthyNode};
pub use event_loop::{read_cluster_view, Controller, EventSender};
pub use planner::{ClusterView, DeployAction, DesiredState, Plan, Planner, Rejection, RemoveAction};
pub use quorum::{can_remove, max_removals, quorum, QuorumGuard};
pub use report::{ActionFailure, ActionKind, EventReport};
