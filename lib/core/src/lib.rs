//! Core domain IDs and error handling for the flowctl execution engine.
//!
//! This crate provides the foundational ID types and error context
//! conventions shared by every other crate in the workspace.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{
    ActionId, ApprovalId, CredentialId, ExecId, FlowId, JobId, NamespaceId, NodeId, ParseIdError,
    UserId,
};
