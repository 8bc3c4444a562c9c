//! Configuration for the membership controller

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Root of the coordination store namespace
    #[serde(default = "default_root")]
    pub root: String,

    /// Fixed cluster size. Derived from the inventory when unset.
    #[serde(default)]
    pub target_cluster_size: Option<usize>,

    /// Upper bound for the derived cluster size
    #[serde(default = "default_max_cluster_size")]
    pub max_cluster_size: usize,

    /// Nodes must stay unhealthy longer than this before removal
    #[serde(default = "default_unhealthy_age_threshold")]
    pub unhealthy_age_threshold_secs: u64,

    /// Bound on waiting for a node agent's notification
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout_ms: u64,

    /// Bound on confirming a live membership change
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_ms: u64,

    #[serde(default = "default_confirm_poll_interval")]
    pub confirm_poll_interval_ms: u64,

    /// Peer port advertised for live members
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_root() -> String {
    "/rook".to_string()
}
fn default_max_cluster_size() -> usize {
    5
}
fn default_unhealthy_age_threshold() -> u64 {
    60
}
fn default_deploy_timeout() -> u64 {
    30_000
}
fn default_confirm_timeout() -> u64 {
    10_000
}
fn default_confirm_poll_interval() -> u64 {
    100
}
fn default_peer_port() -> u16 {
    53379
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            target_cluster_size: None,
            max_cluster_size: default_max_cluster_size(),
            unhealthy_age_threshold_secs: default_unhealthy_age_threshold(),
            deploy_timeout_ms: default_deploy_timeout(),
            confirm_timeout_ms: default_confirm_timeout(),
            confirm_poll_interval_ms: default_confirm_poll_interval(),
            peer_port: default_peer_port(),
            log_level: default_log_level(),
        }
    }
}

impl ControllerConfig {
    /// Load from an optional TOML file, then `ETCDMGR_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix("ETCDMGR"))
            .build()?;

        let cfg: ControllerConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.root.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "root must be absolute: {}",
                self.root
            )));
        }
        if self.max_cluster_size == 0 {
            return Err(Error::InvalidConfig("max_cluster_size must be > 0".into()));
        }
        if let Some(target) = self.target_cluster_size {
            if target == 0 || target > self.max_cluster_size {
                return Err(Error::InvalidConfig(format!(
                    "target_cluster_size {} outside 1..={}",
                    target, self.max_cluster_size
                )));
            }
        }
        if self.deploy_timeout_ms == 0 || self.confirm_timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeouts must be > 0".into()));
        }
        if self.confirm_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "confirm_poll_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Cluster size to converge to for an inventory of `inventory_size` nodes.
    ///
    /// Without a fixed target this is the largest odd size the inventory and
    /// the cap allow, never less than one.
    pub fn target_size(&self, inventory_size: usize) -> usize {
        if let Some(target) = self.target_cluster_size {
            return target;
        }
        let bound = inventory_size.min(self.max_cluster_size).max(1);
        if bound % 2 == 0 {
            bound - 1
        } else {
            bound
        }
    }

    pub fn unhealthy_age_threshold(&self) -> Duration {
        Duration::from_secs(self.unhealthy_age_threshold_secs)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_millis(self.deploy_timeout_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_interval_ms)
    }
}
