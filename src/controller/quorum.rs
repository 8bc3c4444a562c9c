//! Quorum guard
//!
//! Decides how many live members may be removed without losing majority and
//! applies live membership changes one at a time, confirming each against the
//! membership list before issuing the next.

use crate::common::{Error, Result};
use crate::store::{ClusterMember, CoordinationStore};
use std::time::Duration;

/// Majority of an `n`-member cluster
pub fn quorum(n: usize) -> usize {
    n / 2 + 1
}

/// Can `removal_count` of `live_count` members go while keeping a majority?
pub fn can_remove(live_count: usize, removal_count: usize) -> bool {
    removal_count <= live_count && live_count - removal_count >= quorum(live_count)
}

/// Most members that may be removed from a `live_count`-member cluster
pub fn max_removals(live_count: usize) -> usize {
    live_count.saturating_sub(quorum(live_count))
}

/// Serialized live membership mutator
pub struct QuorumGuard<'a> {
    store: &'a dyn CoordinationStore,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl<'a> QuorumGuard<'a> {
    pub fn new(
        store: &'a dyn CoordinationStore,
        confirm_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            confirm_timeout,
            poll_interval,
        }
    }

    /// Re-read the live membership and check a batch of removals against it
    pub async fn check_removals(&self, node_ids: &[String]) -> Result<()> {
        let live = self.store.list_members().await?;
        let requested = node_ids
            .iter()
            .filter(|id| live.iter().any(|m| &m.node_id == *id))
            .count();
        if can_remove(live.len(), requested) {
            Ok(())
        } else {
            Err(Error::QuorumViolation {
                live: live.len(),
                requested,
                allowed: max_removals(live.len()),
            })
        }
    }

    /// Remove one member and wait until the membership list no longer has it
    pub async fn remove_member(&self, node_id: &str) -> Result<()> {
        tracing::info!("Removing member {}", node_id);
        self.store.remove_member(node_id).await?;
        self.confirm(node_id, false).await
    }

    /// Add one member (unless already listed) and wait until it is listed
    pub async fn add_member(&self, member: ClusterMember) -> Result<()> {
        let live = self.store.list_members().await?;
        if live.iter().any(|m| m.node_id == member.node_id) {
            tracing::debug!("Member {} already listed", member.node_id);
            return Ok(());
        }
        let node_id = member.node_id.clone();
        tracing::info!("Adding member {} ({})", node_id, member.peer_url());
        self.store.add_member(member).await?;
        self.confirm(&node_id, true).await
    }

    async fn confirm(&self, node_id: &str, present: bool) -> Result<()> {
        let poll = async {
            loop {
                let live = self.store.list_members().await?;
                if live.iter().any(|m| m.node_id == node_id) == present {
                    return Ok::<(), Error>(());
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match tokio::time::timeout(self.confirm_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConfirmationTimeout {
                node_id: node_id.to_string(),
                timeout: self.confirm_timeout,
            }),
        }
    }
}
