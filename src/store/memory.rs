//! In-memory coordination store.
//!
//! [`MemoryStore`] implements [`CoordinationStore`] with a sorted value map and
//! an in-process membership list. It records every call, counts membership
//! changes in flight, and can be switched into failure modes:
//!
//! - **Unavailable**: every call fails with `StoreUnavailable`
//! - **Dropped removals**: `remove_member` succeeds but the member stays listed
//! - **Membership latency**: membership changes take a fixed time to apply
//!
//! Watches resolve with queued responses first (see
//! [`MemoryStore::add_watch_response`]), then with the next `set` on the path.
//!
//! Not suitable for production: nothing is shared across processes.

use super::{ClusterMember, CoordinationStore};
use crate::common::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// A call made against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Get(String),
    Set(String, String),
    Delete(String),
    ListChildren(String),
    Watch(String),
    ListMembers,
    AddMember(String),
    RemoveMember(String),
}

impl StoreCall {
    pub fn is_membership_change(&self) -> bool {
        matches!(self, StoreCall::AddMember(_) | StoreCall::RemoveMember(_))
    }
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::Internal("lock poisoned".into())
}

#[derive(Debug)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, String>>,
    watch_responses: Mutex<HashMap<String, VecDeque<String>>>,
    members: RwLock<Vec<ClusterMember>>,
    calls: Mutex<Vec<StoreCall>>,
    changes: broadcast::Sender<(String, String)>,
    unavailable: AtomicBool,
    drop_removals: AtomicBool,
    membership_latency_ms: AtomicU64,
    membership_in_flight: AtomicUsize,
    max_membership_in_flight: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: RwLock::new(BTreeMap::new()),
            watch_responses: Mutex::new(HashMap::new()),
            members: RwLock::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            changes,
            unavailable: AtomicBool::new(false),
            drop_removals: AtomicBool::new(false),
            membership_latency_ms: AtomicU64::new(0),
            membership_in_flight: AtomicUsize::new(0),
            max_membership_in_flight: AtomicUsize::new(0),
        }
    }

    /// Store whose live membership starts as `members`
    pub fn with_members(members: impl IntoIterator<Item = ClusterMember>) -> Self {
        let store = Self::new();
        store
            .members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(members);
        store
    }

    /// Queue a value the next watch on `path` resolves with
    pub fn add_watch_response(&self, path: impl Into<String>, value: impl Into<String>) {
        self.watch_responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.into())
            .or_default()
            .push_back(value.into());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_drop_removals(&self, drop: bool) {
        self.drop_removals.store(drop, Ordering::SeqCst);
    }

    /// Latencies beyond `u64::MAX` milliseconds saturate
    pub fn set_membership_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.membership_latency_ms.store(millis, Ordering::SeqCst);
    }

    // === Inspection (never fails, never recorded) ===

    pub fn value(&self, path: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn children(&self, prefix: &str) -> BTreeSet<String> {
        children_of(&self.values.read().unwrap_or_else(PoisonError::into_inner), prefix)
    }

    pub fn members(&self) -> Vec<ClusterMember> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Highest number of membership changes ever applied concurrently
    pub fn max_membership_changes_in_flight(&self) -> usize {
        self.max_membership_in_flight.load(Ordering::SeqCst)
    }

    // === Internals ===

    fn enter(&self, call: StoreCall) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable(format!("{:?} rejected", call)));
        }
        self.calls.lock().map_err(poison_err)?.push(call);
        Ok(())
    }

    fn next_watch_response(&self, path: &str) -> Result<Option<String>> {
        let mut responses = self.watch_responses.lock().map_err(poison_err)?;
        Ok(responses.get_mut(path).and_then(|queue| queue.pop_front()))
    }

    async fn change_membership<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<ClusterMember>) + Send,
    {
        let in_flight = self.membership_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_membership_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let latency = self.membership_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let result = self
            .members
            .write()
            .map(|mut members| apply(&mut *members))
            .map_err(poison_err);

        self.membership_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn children_of(values: &BTreeMap<String, String>, prefix: &str) -> BTreeSet<String> {
    let prefix = format!("{}/", prefix.trim_end_matches('/'));
    values
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .filter_map(|(key, _)| key[prefix.len()..].split('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<String>> {
        self.enter(StoreCall::Get(path.to_string()))?;
        Ok(self.values.read().map_err(poison_err)?.get(path).cloned())
    }

    async fn set(&self, path: &str, value: &str) -> Result<()> {
        self.enter(StoreCall::Set(path.to_string(), value.to_string()))?;
        self.values
            .write()
            .map_err(poison_err)?
            .insert(path.to_string(), value.to_string());
        // No receivers is fine
        let _ = self.changes.send((path.to_string(), value.to_string()));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.enter(StoreCall::Delete(path.to_string()))?;
        let subtree = format!("{}/", path.trim_end_matches('/'));
        self.values
            .write()
            .map_err(poison_err)?
            .retain(|key, _| key != path && !key.starts_with(&subtree));
        Ok(())
    }

    async fn list_children(&self, prefix: &str) -> Result<BTreeSet<String>> {
        self.enter(StoreCall::ListChildren(prefix.to_string()))?;
        Ok(children_of(&*self.values.read().map_err(poison_err)?, prefix))
    }

    async fn watch(&self, path: &str) -> Result<Option<String>> {
        self.enter(StoreCall::Watch(path.to_string()))?;
        // Subscribe before checking queued responses so no write slips between
        let mut rx = self.changes.subscribe();
        if let Some(value) = self.next_watch_response(path)? {
            return Ok(Some(value));
        }
        loop {
            match rx.recv().await {
                Ok((changed, value)) if changed == path => return Ok(Some(value)),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn list_members(&self) -> Result<Vec<ClusterMember>> {
        self.enter(StoreCall::ListMembers)?;
        Ok(self.members.read().map_err(poison_err)?.clone())
    }

    async fn add_member(&self, member: ClusterMember) -> Result<()> {
        self.enter(StoreCall::AddMember(member.node_id.clone()))?;
        self.change_membership(move |members| {
            if !members.iter().any(|m| m.node_id == member.node_id) {
                members.push(member);
            }
        })
        .await
    }

    async fn remove_member(&self, node_id: &str) -> Result<()> {
        self.enter(StoreCall::RemoveMember(node_id.to_string()))?;
        let drop_removal = self.drop_removals.load(Ordering::SeqCst);
        let node_id = node_id.to_string();
        self.change_membership(move |members| {
            if !drop_removal {
                members.retain(|m| m.node_id != node_id);
            }
        })
        .await
    }
}
