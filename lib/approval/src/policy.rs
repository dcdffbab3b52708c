//! `ApprovalPolicyResolver` backed by the running flow definition.

use crate::error::ApprovalError;
use crate::gate::ApprovalPolicyResolver;
use crate::request::Approver;
use async_trait::async_trait;
use flowctl_core::{ActionId, ExecId};
use flowctl_flow::FlowCache;
use std::sync::Arc;

/// Resolves an action's approver allow-list from `Action::approvers` on the
/// flow `FlowExecutionHandler` registered for this execution in `FlowCache`.
pub struct FlowActionPolicyResolver {
    flow_cache: Arc<FlowCache>,
}

impl FlowActionPolicyResolver {
    #[must_use]
    pub fn new(flow_cache: Arc<FlowCache>) -> Self {
        Self { flow_cache }
    }
}

#[async_trait]
impl ApprovalPolicyResolver for FlowActionPolicyResolver {
    async fn approvers_for(&self, exec_id: ExecId, action_id: &ActionId) -> Result<Vec<Approver>, ApprovalError> {
        let flow = self.flow_cache.get(exec_id).ok_or_else(|| ApprovalError::UnknownAction {
            exec_id,
            action_id: action_id.clone(),
        })?;

        let action = flow
            .actions
            .iter()
            .find(|a| &a.id == action_id)
            .ok_or_else(|| ApprovalError::UnknownAction {
                exec_id,
                action_id: action_id.clone(),
            })?;

        Ok(action.approvers.iter().map(|raw| Approver::parse(raw)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowctl_core::NamespaceId;
    use flowctl_flow::{Action, ExecutorKind, Flow};

    fn flow_with_action(action_id: &str, approvers: Vec<String>) -> Flow {
        Flow {
            slug: "deploy".into(),
            db_id: Some(1),
            namespace_id: NamespaceId::new(),
            name: "Deploy".into(),
            description: None,
            inputs: Vec::new(),
            actions: vec![Action {
                id: ActionId::new(action_id),
                name: "Ship it".into(),
                executor: ExecutorKind::Script,
                with: serde_json::json!({}),
                approval: true,
                approvers,
                variables: Vec::new(),
                on: Vec::new(),
                artifacts: Vec::new(),
            }],
            scheduling: Vec::new(),
            notify: Vec::new(),
            allow_overlap: false,
        }
    }

    #[tokio::test]
    async fn resolves_approvers_from_the_registered_flow() {
        let cache = Arc::new(FlowCache::new());
        let exec_id = ExecId::new();
        cache.register(exec_id, flow_with_action("deploy_prod", vec!["group:oncall".into()]));
        let resolver = FlowActionPolicyResolver::new(cache);

        let approvers = resolver.approvers_for(exec_id, &ActionId::new("deploy_prod")).await.unwrap();
        assert_eq!(
            approvers,
            vec![Approver::Group {
                group_id: "oncall".into()
            }]
        );
    }

    #[tokio::test]
    async fn unregistered_execution_is_an_error() {
        let resolver = FlowActionPolicyResolver::new(Arc::new(FlowCache::new()));
        let err = resolver
            .approvers_for(ExecId::new(), &ActionId::new("deploy_prod"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::UnknownAction { .. }));
    }

    #[tokio::test]
    async fn unknown_action_in_a_registered_flow_is_an_error() {
        let cache = Arc::new(FlowCache::new());
        let exec_id = ExecId::new();
        cache.register(exec_id, flow_with_action("deploy_prod", vec![]));
        let resolver = FlowActionPolicyResolver::new(cache);

        let err = resolver.approvers_for(exec_id, &ActionId::new("rollback")).await.unwrap_err();
        assert!(matches!(err, ApprovalError::UnknownAction { .. }));
    }
}
