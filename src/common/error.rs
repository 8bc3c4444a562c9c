//! Error types for etcdmgr

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Planning Errors ===
    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Quorum violation: removing {requested} of {live} members (at most {allowed} allowed)")]
    QuorumViolation {
        live: usize,
        requested: usize,
        allowed: usize,
    },

    // === Deployment Errors ===
    #[error("Deployment of {node_id} timed out after {timeout:?}")]
    DeploymentTimeout { node_id: String, timeout: Duration },

    #[error("Deployment of {node_id} failed: {reason}")]
    DeploymentFailed { node_id: String, reason: String },

    #[error("Membership change for {node_id} not confirmed after {timeout:?}")]
    ConfirmationTimeout { node_id: String, timeout: Duration },

    // === Store Errors ===
    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // === Controller Errors ===
    #[error("Controller is closed")]
    Closed,

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    // === Encoding / I/O ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Can a later corrective event be expected to succeed where this failed?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DeploymentTimeout { .. }
                | Error::ConfirmationTimeout { .. }
                | Error::StoreUnavailable(_)
        )
    }

    /// Short stable label for logs and event reports
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Planning(_) => "planning",
            Error::QuorumViolation { .. } => "quorum_violation",
            Error::DeploymentTimeout { .. } => "deployment_timeout",
            Error::DeploymentFailed { .. } => "deployment_failed",
            Error::ConfirmationTimeout { .. } => "confirmation_timeout",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::InvalidPath(_) => "invalid_path",
            Error::Closed => "closed",
            Error::InvalidConfig(_) | Error::Config(_) => "config",
            Error::Json(_) => "json",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
            Error::Other(_) => "other",
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
