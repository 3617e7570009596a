//! Node identity: the `(hid, sid, node_id)` triple.
//!
//! The HID namespaces every subject and authorization check; the SID names
//! a logical service instance; the node id is unique per process.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a swarm node.
///
/// A node id is generated once per process and never reused. The hid/sid
/// pair is carried in gossip metadata so other domains can route back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Hierarchical (household/domain) identifier. Authorization root.
    pub hid: String,
    /// Service identifier for the logical instance.
    pub sid: String,
    /// Per-process unique node identifier.
    pub node_id: String,
}

impl NodeIdentity {
    /// Build an identity, generating any missing field.
    ///
    /// Generated node ids embed the sid so operators can read logs without
    /// a lookup table.
    pub fn generate(hid: Option<String>, sid: Option<String>, node_id: Option<String>) -> Self {
        let hid = hid.filter(|s| !s.is_empty()).unwrap_or_else(|| format!("hid-{}", short_id()));
        let sid = sid.filter(|s| !s.is_empty()).unwrap_or_else(|| format!("sid-{}", short_id()));
        let node_id = node_id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("{}-{}", sid, short_id()));
        Self { hid, sid, node_id }
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.hid, self.sid, self.node_id)
    }
}

fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_fills_missing_fields() {
        let id = NodeIdentity::generate(None, None, None);
        assert!(id.hid.starts_with("hid-"));
        assert!(id.sid.starts_with("sid-"));
        assert!(id.node_id.starts_with(&id.sid));
    }

    #[test]
    fn test_generate_keeps_provided_fields() {
        let id = NodeIdentity::generate(
            Some("home".to_string()),
            Some("assistant".to_string()),
            Some("n1".to_string()),
        );
        assert_eq!(id.hid, "home");
        assert_eq!(id.sid, "assistant");
        assert_eq!(id.node_id, "n1");
    }

    #[test]
    fn test_empty_strings_are_regenerated() {
        let id = NodeIdentity::generate(Some(String::new()), None, None);
        assert!(!id.hid.is_empty());
    }

    #[test]
    fn test_node_ids_are_unique() {
        let a = NodeIdentity::generate(None, Some("svc".to_string()), None);
        let b = NodeIdentity::generate(None, Some("svc".to_string()), None);
        assert_ne!(a.node_id, b.node_id);
    }
}
