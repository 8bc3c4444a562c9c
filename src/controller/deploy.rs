//! Deployment coordinator
//!
//! Drives one node's join: publish the desired-state entry, then wait for the
//! node's agent to report on its notification path. A `failed` report, a
//! closed watch or a timeout retracts the desired-state entry.

use crate::common::{Error, Result, StorePaths};
use crate::controller::planner::DeployAction;
use crate::store::CoordinationStore;
use std::time::Duration;
use tokio::time::Instant;

/// Join status published by a node's agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationStatus {
    Pending,
    Succeeded,
    Failed,
}

impl NotificationStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "pending" => Some(NotificationStatus::Pending),
            "succeeded" => Some(NotificationStatus::Succeeded),
            "failed" => Some(NotificationStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Succeeded => write!(f, "succeeded"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct DeploymentCoordinator<'a> {
    store: &'a dyn CoordinationStore,
    paths: &'a StorePaths,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a> DeploymentCoordinator<'a> {
    pub fn new(store: &'a dyn CoordinationStore, paths: &'a StorePaths, timeout: Duration) -> Self {
        Self {
            store,
            paths,
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often a watch is interrupted to re-read the status directly
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Deploy one node. On error the desired-state entry has been retracted
    /// (unless the store itself failed the retraction).
    pub async fn deploy(&self, action: &DeployAction) -> Result<()> {
        // Any status left from an earlier attempt must not answer this one
        self.store
            .delete(&self.paths.notify_status(&action.node_id))
            .await?;
        self.store
            .set(&self.paths.desired_ip(&action.node_id), &action.address)
            .await?;
        tracing::info!(
            "Desired {} at {}, waiting for agent",
            action.node_id,
            action.address
        );

        match self.wait_for_agent(&action.node_id).await {
            Ok(()) => {
                tracing::info!("Agent on {} joined", action.node_id);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Deployment of {} failed: {}", action.node_id, e);
                self.retract(&action.node_id).await;
                Err(e)
            }
        }
    }

    /// Remove a node's desired-state entry, logging rather than failing
    pub async fn retract(&self, node_id: &str) {
        if let Err(e) = self.store.delete(&self.paths.desired_node(node_id)).await {
            tracing::error!("Could not retract desired entry for {}: {}", node_id, e);
        }
    }

    /// Wait until the agent reports a final status. The stored value is read
    /// before every watch, so a report written before the watch starts is
    /// still seen.
    async fn wait_for_agent(&self, node_id: &str) -> Result<()> {
        let path = self.paths.notify_status(node_id);
        let deadline = Instant::now() + self.timeout;
        let mut seen: Option<String> = None;

        loop {
            if let Some(current) = self.store.get(&path).await? {
                if seen.as_deref() != Some(current.as_str()) {
                    if let Some(outcome) = Self::outcome(node_id, &current) {
                        return outcome;
                    }
                    seen = Some(current);
                }
            }

            let wake = deadline.min(Instant::now() + self.poll_interval);
            let value = match tokio::time::timeout_at(wake, self.store.watch(&path)).await {
                Ok(result) => result?,
                Err(_) if Instant::now() >= deadline => {
                    return Err(Error::DeploymentTimeout {
                        node_id: node_id.to_string(),
                        timeout: self.timeout,
                    })
                }
                Err(_) => continue,
            };

            let Some(value) = value else {
                return Err(Error::DeploymentFailed {
                    node_id: node_id.to_string(),
                    reason: "notification watch closed".into(),
                });
            };

            if let Some(outcome) = Self::outcome(node_id, &value) {
                return outcome;
            }
            seen = Some(value);
        }
    }

    /// Final result for a reported status, or `None` while still pending
    fn outcome(node_id: &str, value: &str) -> Option<Result<()>> {
        match NotificationStatus::parse(value) {
            Some(NotificationStatus::Succeeded) => Some(Ok(())),
            Some(NotificationStatus::Pending) => {
                tracing::debug!("{} still pending", node_id);
                None
            }
            Some(NotificationStatus::Failed) => Some(Err(Error::DeploymentFailed {
                node_id: node_id.to_string(),
                reason: "agent reported failure".into(),
            })),
            None => Some(Err(Error::DeploymentFailed {
                node_id: node_id.to_string(),
                reason: format!("unexpected status {:?}", value),
            })),
        }
    }
}
