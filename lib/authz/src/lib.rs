//! The group membership seam consumed by approval authorization and
//! notification receiver expansion.
//!
//! RBAC enforcement itself — OIDC, relationship-store-backed permission
//! checks — is an external system; this crate exposes only the narrow
//! lookups those two consumers need.

mod error;
mod membership;

pub use error::GroupMembershipError;
pub use membership::{GroupId, GroupMembership, InMemoryGroupMembership};
