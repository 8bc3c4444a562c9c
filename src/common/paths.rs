//! Path layout inside the coordination store namespace
//!
//! ```text
//! /<root>/services/etcd/desired/<nodeID>/ipaddress   desired member address
//! /<root>/_notify/<nodeID>/etcd/status               agent join result
//! ```

use crate::common::utils::encode_segment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    root: String,
}

impl StorePaths {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = root.trim_end_matches('/').to_string();
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Parent of all desired-state entries
    pub fn desired_root(&self) -> String {
        format!("{}/services/etcd/desired", self.root)
    }

    pub fn desired_node(&self, node_id: &str) -> String {
        format!("{}/{}", self.desired_root(), encode_segment(node_id))
    }

    pub fn desired_ip(&self, node_id: &str) -> String {
        format!("{}/ipaddress", self.desired_node(node_id))
    }

    pub fn notify_status(&self, node_id: &str) -> String {
        format!("{}/_notify/{}/etcd/status", self.root, encode_segment(node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = StorePaths::new("/rook/");
        assert_eq!(paths.desired_root(), "/rook/services/etcd/desired");
        assert_eq!(
            paths.desired_ip("b"),
            "/rook/services/etcd/desired/b/ipaddress"
        );
        assert_eq!(paths.notify_status("b"), "/rook/_notify/b/etcd/status");
    }

    #[test]
    fn test_node_id_cannot_escape_segment() {
        let paths = StorePaths::new("/rook");
        assert_eq!(
            paths.desired_node("../x"),
            "/rook/services/etcd/desired/..%2Fx"
        );
    }
}
