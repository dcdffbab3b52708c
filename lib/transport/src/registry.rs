//! A simple, in-memory `NodeResolver` backed by a fixed node list loaded at
//! startup. Node definitions carry no entry in the queue-visible Postgres
//! schema, so the composition root loads them once (from config or a
//! provisioning step external to this crate) rather than through a store
//! seam of their own.

use async_trait::async_trait;
use flowctl_core::NamespaceId;
use flowctl_flow::{ExecutionError, Node, NodeResolver};
use std::collections::HashMap;

/// Resolves nodes by `(namespace_id, name)` out of a fixed map.
pub struct StaticNodeResolver {
    nodes: HashMap<(NamespaceId, String), Node>,
}

impl StaticNodeResolver {
    /// Builds a resolver from a flat node list, keyed by `(namespace_id, name)`.
    #[must_use]
    pub fn new(nodes: Vec<Node>) -> Self {
        let nodes = nodes.into_iter().map(|node| ((node.namespace_id, node.name.clone()), node)).collect();
        Self { nodes }
    }
}

#[async_trait]
impl NodeResolver for StaticNodeResolver {
    async fn resolve(&self, namespace_id: NamespaceId, name: &str) -> Result<Node, ExecutionError> {
        self.nodes
            .get(&(namespace_id, name.to_string()))
            .cloned()
            .ok_or_else(|| ExecutionError::NodeUnreachable {
                node_name: name.to_string(),
                reason: "no node registered with that name in this namespace".into(),
            })
    }
}
