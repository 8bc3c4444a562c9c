//! Per-event outcome reports

use crate::common::Error;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Reading the cluster snapshot
    Read,
    Plan,
    Deploy,
    Register,
    Remove,
}

/// One action that did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFailure {
    pub node_id: Option<String>,
    pub action: ActionKind,
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ActionFailure {
    pub fn new(node_id: Option<&str>, action: ActionKind, error: &Error) -> Self {
        Self {
            node_id: node_id.map(str::to_string),
            action,
            kind: error.kind(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// What processing one event changed, and what it could not
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventReport {
    pub event_id: String,
    pub kind: &'static str,
    pub deployed: Vec<String>,
    pub removed: Vec<String>,
    pub failures: Vec<ActionFailure>,
}

impl EventReport {
    pub fn new(event_id: impl Into<String>, kind: &'static str) -> Self {
        Self {
            event_id: event_id.into(),
            kind,
            deployed: Vec::new(),
            removed: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn fail(&mut self, node_id: Option<&str>, action: ActionKind, error: &Error) {
        self.failures.push(ActionFailure::new(node_id, action, error));
    }

    /// Record an action skipped because an earlier one in its batch failed
    pub fn abort(&mut self, node_id: &str, action: ActionKind, cause: &Error) {
        self.failures.push(ActionFailure {
            node_id: Some(node_id.to_string()),
            action,
            kind: cause.kind(),
            message: format!("not attempted: {}", cause),
            retryable: cause.is_retryable(),
        });
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures of a given error kind
    pub fn failures_of(&self, kind: &str) -> impl Iterator<Item = &ActionFailure> {
        let kind = kind.to_string();
        self.failures.iter().filter(move |f| f.kind == kind)
    }
}
