//! Error types for the approval coordinator.

use flowctl_core::{ActionId, ApprovalId, ExecId};
use std::fmt;

/// Errors from the `ApprovalStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalStoreError {
    NotFound { id: ApprovalId },
    /// A non-terminal request already exists for this (exec, action) pair.
    AlreadyPending { exec_id: ExecId, action_id: ActionId },
    /// The request is in a terminal state and cannot be re-decided.
    AlreadyDecided { id: ApprovalId },
    /// The backing store rejected the operation for a reason that isn't one
    /// of the above (connection failure, decode failure, ...).
    StorageFailed { reason: String },
}

impl fmt::Display for ApprovalStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "approval request not found: {id}"),
            Self::AlreadyPending { exec_id, action_id } => {
                write!(f, "a pending approval request already exists for execution {exec_id} action {action_id}")
            }
            Self::AlreadyDecided { id } => write!(f, "approval request {id} is already decided"),
            Self::StorageFailed { reason } => write!(f, "approval store operation failed: {reason}"),
        }
    }
}

impl std::error::Error for ApprovalStoreError {}

/// High-level approval coordinator errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    /// Wraps a store error for context (use as context wrapper).
    Store { exec_id: ExecId, action_id: ActionId },
    /// `decide` was called by a subject not on the request's allow-list.
    NotAuthorized { id: ApprovalId, decider: String },
    /// `decide` was called with an unknown request ID.
    RequestNotFound { id: ApprovalId },
    /// The policy resolver has no flow registered for `exec_id`, or the flow
    /// has no action matching `action_id`.
    UnknownAction { exec_id: ExecId, action_id: ActionId },
}

impl fmt::Display for ApprovalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store { exec_id, action_id } => {
                write!(f, "approval operation failed for execution {exec_id} action {action_id}")
            }
            Self::NotAuthorized { id, decider } => {
                write!(f, "'{decider}' is not authorized to decide approval request {id}")
            }
            Self::RequestNotFound { id } => write!(f, "approval request not found: {id}"),
            Self::UnknownAction { exec_id, action_id } => write!(
                f,
                "no registered flow action {action_id} for execution {exec_id}"
            ),
        }
    }
}

impl std::error::Error for ApprovalError {}
