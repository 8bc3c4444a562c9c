//! Event loop
//!
//! A single worker task consumes every cluster event in arrival order and
//! drives it to completion (store writes, notification waits, membership
//! confirmations) before taking the next one. This is what keeps live
//! membership changes one at a time.

use crate::common::{decode_segment, ControllerConfig, Error, Result, StorePaths};
use crate::controller::deploy::DeploymentCoordinator;
use crate::controller::event::ClusterEvent;
use crate::controller::planner::{ClusterView, DeployAction, DesiredState, Planner, RemoveAction};
use crate::controller::quorum::QuorumGuard;
use crate::controller::report::{ActionKind, EventReport};
use crate::store::{ClusterMember, CoordinationStore};
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

const REPORT_CHANNEL_CAPACITY: usize = 256;

enum Message {
    Event(Box<ClusterEvent>),
    /// Answered once every message queued before it has been handled
    Drain(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable handle producers use to queue events
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Message>,
    accepting: Arc<AtomicBool>,
}

impl EventSender {
    pub fn send(&self, event: ClusterEvent) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.tx
            .send(Message::Event(Box::new(event)))
            .map_err(|_| Error::Closed)
    }
}

/// Membership controller for one cluster
pub struct Controller {
    config: ControllerConfig,
    sender: EventSender,
    rx: Option<mpsc::UnboundedReceiver<Message>>,
    worker: Option<JoinHandle<()>>,
    reports: broadcast::Sender<EventReport>,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Ok(Self {
            config,
            sender: EventSender {
                tx,
                accepting: Arc::new(AtomicBool::new(true)),
            },
            rx: Some(rx),
            worker: None,
            reports,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Spawn the worker. Events queued earlier are processed first.
    pub fn start_watch_events(&mut self) -> Result<()> {
        let rx = self
            .rx
            .take()
            .ok_or_else(|| Error::Internal("event worker already started".into()))?;

        let worker = EventWorker {
            planner: Planner::new(self.config.clone()),
            paths: StorePaths::new(self.config.root.clone()),
            config: self.config.clone(),
            reports: self.reports.clone(),
        };
        tracing::info!("Starting membership controller under {}", self.config.root);
        self.worker = Some(tokio::spawn(worker.run(rx)));
        Ok(())
    }

    pub fn events(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn send(&self, event: ClusterEvent) -> Result<()> {
        self.sender.send(event)
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<EventReport> {
        self.reports.subscribe()
    }

    /// Resolve once every event queued before this call is fully processed
    pub async fn wait_for_events(&self) -> Result<()> {
        if self.worker.is_none() {
            return Err(Error::Closed);
        }
        let (done, wait) = oneshot::channel();
        self.sender
            .tx
            .send(Message::Drain(done))
            .map_err(|_| Error::Closed)?;
        wait.await.map_err(|_| Error::Closed)
    }

    /// Stop accepting events, let accepted ones finish, and join the worker
    pub async fn close(&mut self) -> Result<()> {
        self.sender.accepting.store(false, Ordering::SeqCst);
        let Some(worker) = self.worker.take() else {
            self.rx = None;
            return Ok(());
        };
        // Fails only if the worker is already gone
        let _ = self.sender.tx.send(Message::Shutdown);
        worker
            .await
            .map_err(|e| Error::Internal(format!("event worker failed: {}", e)))?;
        tracing::info!("Membership controller closed");
        Ok(())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.sender.accepting.store(false, Ordering::SeqCst);
        if self.worker.is_some() {
            let _ = self.sender.tx.send(Message::Shutdown);
        }
    }
}

/// Read the desired state and live membership
pub async fn read_cluster_view(
    store: &dyn CoordinationStore,
    paths: &StorePaths,
) -> Result<ClusterView> {
    let mut desired = DesiredState::new();
    for child in store.list_children(&paths.desired_root()).await? {
        let node_id = decode_segment(&child)?;
        // Entries without an address are not desired members yet
        if let Some(ip) = store.get(&paths.desired_ip(&node_id)).await? {
            desired.insert(node_id, ip);
        }
    }
    let live = store.list_members().await?;
    Ok(ClusterView { desired, live })
}

struct EventWorker {
    planner: Planner,
    paths: StorePaths,
    config: ControllerConfig,
    reports: broadcast::Sender<EventReport>,
}

impl EventWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            match message {
                Message::Event(event) => self.handle(*event).await,
                Message::Drain(done) => {
                    let _ = done.send(());
                }
                // Already-queued messages are still delivered after close
                Message::Shutdown => rx.close(),
            }
        }
        tracing::debug!("Event worker stopped");
    }

    async fn handle(&self, event: ClusterEvent) {
        let span = tracing::info_span!("cluster_event", id = %event.id, kind = event.kind.name());
        let report = self.process(&event).instrument(span).await;

        if report.is_success() {
            tracing::info!(
                "Event {} done: deployed {:?}, removed {:?}",
                report.event_id,
                report.deployed,
                report.removed
            );
        } else {
            for failure in &report.failures {
                tracing::warn!(
                    "Event {} {:?} {}: {}",
                    report.event_id,
                    failure.action,
                    failure.node_id.as_deref().unwrap_or("-"),
                    failure.message
                );
            }
        }
        // No subscribers is fine
        let _ = self.reports.send(report);
    }

    async fn process(&self, event: &ClusterEvent) -> EventReport {
        let mut report = EventReport::new(event.id.to_string(), event.kind.name());
        let store = &*event.context.store;

        let view = match read_cluster_view(store, &self.paths).await {
            Ok(view) => view,
            Err(e) => {
                report.fail(None, ActionKind::Read, &e);
                return report;
            }
        };

        let plan = self
            .planner
            .plan(&event.context.inventory, &view, &event.kind);
        tracing::debug!(
            "Plan: deploy {:?}, remove {:?}, next desired {:?}",
            plan.deploys,
            plan.removals,
            plan.next_desired
        );
        for rejection in &plan.rejections {
            report.fail(
                Some(rejection.node_id()),
                ActionKind::Plan,
                &rejection.to_error(),
            );
        }

        let guard = QuorumGuard::new(
            store,
            self.config.confirm_timeout(),
            self.config.confirm_poll_interval(),
        );

        let failed_removals = self
            .apply_removals(store, &guard, &plan.removals, &mut report)
            .await;
        // Replacements only stand in for members that actually left
        let deploy_count = plan.deploys.len().saturating_sub(failed_removals);
        self.apply_deploys(store, &guard, &plan.deploys[..deploy_count], &mut report)
            .await;

        report
    }

    /// Remove members strictly one after another. Returns how many removals
    /// did not complete.
    async fn apply_removals(
        &self,
        store: &dyn CoordinationStore,
        guard: &QuorumGuard<'_>,
        removals: &[RemoveAction],
        report: &mut EventReport,
    ) -> usize {
        if removals.is_empty() {
            return 0;
        }

        let live_ids: Vec<String> = removals
            .iter()
            .filter(|r| r.live)
            .map(|r| r.node_id.clone())
            .collect();
        let mut aborted = if live_ids.is_empty() {
            None
        } else {
            guard.check_removals(&live_ids).await.err()
        };

        let mut failed = 0;
        for removal in removals {
            if let Some(cause) = &aborted {
                report.abort(&removal.node_id, ActionKind::Remove, cause);
                failed += 1;
                continue;
            }

            match self.retire(store, guard, removal).await {
                Ok(()) => {
                    tracing::info!("Retired {}", removal.node_id);
                    report.removed.push(removal.node_id.clone());
                }
                Err(e) => {
                    report.fail(Some(removal.node_id.as_str()), ActionKind::Remove, &e);
                    failed += 1;
                    aborted = Some(e);
                }
            }
        }
        failed
    }

    /// Drop a member from the live list (if listed), then from desired state
    async fn retire(
        &self,
        store: &dyn CoordinationStore,
        guard: &QuorumGuard<'_>,
        removal: &RemoveAction,
    ) -> Result<()> {
        if removal.live {
            guard.remove_member(&removal.node_id).await?;
        }
        store
            .delete(&self.paths.desired_node(&removal.node_id))
            .await
    }

    /// Wait on all deployments together, then register the successful ones
    /// as live members one at a time.
    async fn apply_deploys(
        &self,
        store: &dyn CoordinationStore,
        guard: &QuorumGuard<'_>,
        deploys: &[DeployAction],
        report: &mut EventReport,
    ) {
        if deploys.is_empty() {
            return;
        }

        let coordinator = DeploymentCoordinator::new(store, &self.paths, self.config.deploy_timeout())
            .with_poll_interval(self.config.confirm_poll_interval());
        let results = join_all(deploys.iter().map(|action| coordinator.deploy(action))).await;

        for (action, result) in deploys.iter().zip(results) {
            if let Err(e) = result {
                report.fail(Some(action.node_id.as_str()), ActionKind::Deploy, &e);
                continue;
            }
            let member = ClusterMember::new(&action.node_id, &action.address, self.config.peer_port);
            match guard.add_member(member).await {
                Ok(()) => report.deployed.push(action.node_id.clone()),
                Err(e) => {
                    report.fail(Some(action.node_id.as_str()), ActionKind::Register, &e);
                    coordinator.retract(&action.node_id).await;
                }
            }
        }
    }
}
