//! Adapter implementing `flowctl_flow::ApprovalGate` over `ApprovalCoordinator`.

use crate::coordinator::{ApprovalCoordinator, GateOutcome};
use crate::error::ApprovalError;
use crate::request::Approver;
use async_trait::async_trait;
use flowctl_core::{ActionId, ExecId};
use flowctl_flow::{ApprovalDecision, ApprovalGate, ExecutionError};
use std::sync::Arc;

/// Resolves the approver allow-list for a gated action. Implemented by the
/// composition root, typically backed by whatever stores flow definitions.
#[async_trait]
pub trait ApprovalPolicyResolver: Send + Sync {
    async fn approvers_for(&self, exec_id: ExecId, action_id: &ActionId) -> Result<Vec<Approver>, ApprovalError>;
}

/// Bridges the flow handler's narrow `ApprovalGate` seam to the coordinator,
/// resolving the action's allow-list via `ApprovalPolicyResolver` on every
/// gate check (the coordinator's own cache absorbs the repeat cost).
pub struct ApprovalGateAdapter {
    coordinator: Arc<ApprovalCoordinator>,
    policy: Arc<dyn ApprovalPolicyResolver>,
}

impl ApprovalGateAdapter {
    #[must_use]
    pub fn new(coordinator: Arc<ApprovalCoordinator>, policy: Arc<dyn ApprovalPolicyResolver>) -> Self {
        Self { coordinator, policy }
    }
}

#[async_trait]
impl ApprovalGate for ApprovalGateAdapter {
    async fn gate(&self, exec_id: ExecId, action_id: &ActionId) -> Result<ApprovalDecision, ExecutionError> {
        let approvers = self
            .policy
            .approvers_for(exec_id, action_id)
            .await
            .map_err(|e| ExecutionError::LogWriteFailed { reason: e.to_string() })?;

        let outcome = self
            .coordinator
            .request(exec_id, action_id.clone(), None, approvers)
            .await
            .map_err(|e| ExecutionError::LogWriteFailed { reason: e.to_string() })?;

        Ok(match outcome {
            GateOutcome::Approved => ApprovalDecision::Approved,
            GateOutcome::Rejected { reason } => ApprovalDecision::Rejected { reason },
            GateOutcome::Pending { .. } => ApprovalDecision::Pending,
        })
    }
}
