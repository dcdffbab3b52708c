//! The `Node` entity: a named, namespace-scoped compute target that an
//! action's `on` list references by name. Connecting to one is the Node
//! Driver's job (`flowctl_transport`); this module only holds the registry
//! entry.

use flowctl_core::{CredentialId, NamespaceId, NodeId};
use serde::{Deserialize, Serialize};

/// Closed set of transports a `Node` may be reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Plain SSH over TCP.
    Ssh,
    /// SSH semantics carried over a QUIC transport.
    Qssh,
}

/// Closed set of operating system families a `Node` may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    Linux,
    Windows,
    Darwin,
}

/// A target compute host within a namespace.
///
/// An action references a node by `name`; the empty string is reserved and
/// denotes local execution, so it is never a valid `Node::name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier.
    pub id: NodeId,
    /// Owning namespace.
    pub namespace_id: NamespaceId,
    /// Display/reference name, unique within the namespace. Never empty.
    pub name: String,
    /// Hostname or IP address.
    pub hostname: String,
    /// Port to connect on.
    pub port: u16,
    /// Username to authenticate as.
    pub username: String,
    /// Operating system family, used for path-join and shell conventions.
    pub os_family: OsFamily,
    /// Transport to use.
    pub connection_type: ConnectionType,
    /// Free-form labels for filtering/selection.
    pub tags: Vec<String>,
    /// Credential this node authenticates with.
    pub credential_id: CredentialId,
    /// For `qssh` nodes with a self-signed certificate: trust it without
    /// verification rather than requiring a CA-issued cert. Ignored for `ssh`.
    #[serde(default)]
    pub skip_cert_verification: bool,
}

impl Node {
    /// True for a name reserved to mean "run locally", never assignable to
    /// a real `Node` row.
    #[must_use]
    pub fn is_local_name(name: &str) -> bool {
        name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node(name: &str) -> Node {
        Node {
            id: NodeId::new(),
            namespace_id: NamespaceId::new(),
            name: name.to_string(),
            hostname: "10.0.0.5".into(),
            port: 22,
            username: "deploy".into(),
            os_family: OsFamily::Linux,
            connection_type: ConnectionType::Ssh,
            tags: vec!["prod".into()],
            credential_id: CredentialId::new(),
            skip_cert_verification: false,
        }
    }

    #[test]
    fn empty_name_is_reserved_for_local() {
        assert!(Node::is_local_name(""));
        assert!(!Node::is_local_name("web-1"));
    }

    #[test]
    fn node_serde_roundtrip() {
        let node = sample_node("web-1");
        let json = serde_json::to_string(&node).expect("serialize");
        let parsed: Node = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(node, parsed);
    }
}
