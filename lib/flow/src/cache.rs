//! Per-execution flow definition cache.
//!
//! The full `Flow` travels inline in `FlowExecutionPayload`, so nothing
//! downstream of the job queue has it on hand once the handler returns. The
//! approval policy resolver needs it to look up an action's approver
//! allow-list when an `ApprovalGate::gate` call only carries `(exec_id,
//! action_id)`, so `FlowExecutionHandler` registers the flow here for the
//! duration of the run.

use crate::definition::Flow;
use flowctl_core::ExecId;
use std::collections::HashMap;
use std::sync::RwLock;

/// Maps a running execution to the flow definition it was started from.
#[derive(Default)]
pub struct FlowCache {
    flows: RwLock<HashMap<ExecId, Flow>>,
}

impl FlowCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, exec_id: ExecId, flow: Flow) {
        self.flows.write().expect("lock poisoned").insert(exec_id, flow);
    }

    #[must_use]
    pub fn get(&self, exec_id: ExecId) -> Option<Flow> {
        self.flows.read().expect("lock poisoned").get(&exec_id).cloned()
    }

    pub fn remove(&self, exec_id: ExecId) {
        self.flows.write().expect("lock poisoned").remove(&exec_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Flow;
    use flowctl_core::NamespaceId;

    fn sample_flow() -> Flow {
        Flow {
            slug: "deploy".into(),
            db_id: Some(1),
            namespace_id: NamespaceId::new(),
            name: "Deploy".into(),
            description: None,
            inputs: Vec::new(),
            actions: Vec::new(),
            scheduling: Vec::new(),
            notify: Vec::new(),
            allow_overlap: false,
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let cache = FlowCache::new();
        let exec_id = ExecId::new();
        cache.register(exec_id, sample_flow());
        assert_eq!(cache.get(exec_id).unwrap().slug, "deploy");
    }

    #[test]
    fn get_of_unregistered_exec_is_none() {
        let cache = FlowCache::new();
        assert!(cache.get(ExecId::new()).is_none());
    }

    #[test]
    fn remove_clears_the_entry() {
        let cache = FlowCache::new();
        let exec_id = ExecId::new();
        cache.register(exec_id, sample_flow());
        cache.remove(exec_id);
        assert!(cache.get(exec_id).is_none());
    }
}
