//! # etcdmgr
//!
//! Membership controller for an embedded etcd cluster spread over a dynamic
//! set of nodes. It decides, event by event, what the desired membership
//! should be and walks the live cluster there without losing quorum:
//! - Grows the cluster toward its target size as nodes appear
//! - Retires members that stay unhealthy, never below a majority
//! - Applies live membership changes strictly one at a time
//!
//! ## Architecture
//!
//! ```text
//!  inventory / health watchers
//!             │ ClusterEvent
//!  ┌──────────▼──────────┐
//!  │  Event loop (1 task)│
//!  └──────────┬──────────┘
//!             │
//!  ┌──────────▼──────────┐     ┌──────────────────────┐
//!  │  Planner (pure)     │────▶│ Deployment coordinator│
//!  └──────────┬──────────┘     └──────────┬───────────┘
//!             │ removals                  │ desired / notify
//!  ┌──────────▼──────────┐                │
//!  │  Quorum guard       │                │
//!  └──────────┬──────────┘                │
//!             ▼                           ▼
//!       Coordination store (key-value + membership API)
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use etcdmgr::controller::{ClusterEvent, Controller, EventContext, Inventory, NodeRecord};
//! use etcdmgr::store::MemoryStore;
//! use etcdmgr::ControllerConfig;
//! use std::sync::Arc;
//!
//! # async fn run() -> etcdmgr::Result<()> {
//! let mut controller = Controller::new(ControllerConfig::default())?;
//! controller.start_watch_events()?;
//!
//! let inventory: Inventory = [NodeRecord::new("a", "1.2.3.4")].into_iter().collect();
//! let context = EventContext::new(Arc::new(MemoryStore::new()), inventory);
//! controller.send(ClusterEvent::add_node(context, "a"))?;
//!
//! controller.wait_for_events().await?;
//! controller.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod controller;
pub mod store;

// Re-export commonly used types
pub use common::{ControllerConfig, Error, Result};
pub use controller::Controller;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
