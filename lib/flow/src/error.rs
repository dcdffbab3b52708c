//! Error types for the flow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `DefinitionError`: flow/action/input validation failures
//! - `ExecutionError`: per-execution runtime failures
//! - `FlowError`: high-level wrapper for context

use flowctl_core::{ActionId, ExecId};
use std::fmt;

/// Errors from validating a flow definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// Two actions declared the same ID.
    DuplicateActionId { action_id: ActionId },
    /// Two inputs declared the same name.
    DuplicateInputName { name: String },
    /// An input name did not match `^[A-Za-z0-9_]+$`.
    InvalidInputName { name: String },
    /// An input declared a type outside the closed set.
    UnknownInputType { name: String, input_type: String },
    /// An action declared an executor kind outside the closed set.
    UnknownExecutorKind { action_id: ActionId, kind: String },
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateActionId { action_id } => {
                write!(f, "duplicate action id: {action_id}")
            }
            Self::DuplicateInputName { name } => write!(f, "duplicate input name: {name}"),
            Self::InvalidInputName { name } => {
                write!(f, "invalid input name '{name}': must match ^[A-Za-z0-9_]+$")
            }
            Self::UnknownInputType { name, input_type } => {
                write!(f, "input '{name}' has unknown type '{input_type}'")
            }
            Self::UnknownExecutorKind { action_id, kind } => {
                write!(f, "action {action_id} has unknown executor kind '{kind}'")
            }
        }
    }
}

impl std::error::Error for DefinitionError {}

/// Errors during a single flow execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// An action targeting a node failed to connect.
    NodeUnreachable { node_name: String, reason: String },
    /// The executor seam reported a non-zero exit or adapter failure.
    ExecutorFailed {
        action_id: ActionId,
        node_name: String,
        reason: String,
    },
    /// The handler hit the approval-pending sentinel; do not retry.
    PendingApproval,
    /// The handler observed cancellation; do not retry.
    Cancelled,
    /// An approval request for this (exec, action) was rejected.
    ApprovalRejected { action_id: ActionId, reason: String },
    /// A checkpoint write or execution log update failed.
    LogWriteFailed { reason: String },
    /// Optimistic concurrency conflict on the execution log row.
    VersionConflict { exec_id: ExecId },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeUnreachable { node_name, reason } => {
                write!(f, "node '{node_name}' unreachable: {reason}")
            }
            Self::ExecutorFailed {
                action_id,
                node_name,
                reason,
            } => write!(f, "action {action_id} on node '{node_name}' failed: {reason}"),
            Self::PendingApproval => write!(f, "execution is pending approval"),
            Self::Cancelled => write!(f, "execution was cancelled"),
            Self::ApprovalRejected { action_id, reason } => {
                write!(f, "approval for action {action_id} rejected: {reason}")
            }
            Self::LogWriteFailed { reason } => write!(f, "execution log write failed: {reason}"),
            Self::VersionConflict { exec_id } => {
                write!(f, "execution log version conflict for {exec_id}")
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

impl ExecutionError {
    /// Whether the scheduler's retry machinery should act on this error.
    ///
    /// `PendingApproval` and `Cancelled` are terminal-for-retry sentinels
    /// (spec §7); everything else is an ordinary retriable failure.
    #[must_use]
    pub fn is_retriable_kind(&self) -> bool {
        !matches!(self, Self::PendingApproval | Self::Cancelled)
    }
}

/// High-level flow errors.
///
/// Use these to add context when wrapping lower-level errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// Flow failed validation (use as context wrapper).
    InvalidDefinition { flow_slug: String },
    /// Execution failed (use as context wrapper).
    Execution { exec_id: ExecId },
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDefinition { flow_slug } => {
                write!(f, "flow '{flow_slug}' failed validation")
            }
            Self::Execution { exec_id } => write!(f, "execution {exec_id} failed"),
        }
    }
}

impl std::error::Error for FlowError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_retriable_kind() {
        assert!(!ExecutionError::PendingApproval.is_retriable_kind());
        assert!(!ExecutionError::Cancelled.is_retriable_kind());
        assert!(ExecutionError::LogWriteFailed {
            reason: "disk full".into()
        }
        .is_retriable_kind());
    }

    #[test]
    fn definition_error_display() {
        let err = DefinitionError::InvalidInputName {
            name: "bad name".into(),
        };
        assert!(err.to_string().contains("bad name"));
    }
}
