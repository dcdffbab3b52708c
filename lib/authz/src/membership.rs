//! The `GroupMembership` seam: resolves group membership against whatever
//! external directory the deployment uses (OIDC groups claim, an LDAP sync
//! job, a SpiceDB-equivalent relationship store). RBAC enforcement itself is
//! out of scope; this crate only exposes the two lookups the Approval
//! Coordinator's `authorize` and the Notification Handler's `group:<name>`
//! receiver expansion need.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

use crate::error::GroupMembershipError;

/// A stable group identifier. Authorization matches on this, never on the
/// display name a receiver string or an approver list spells out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// External collaborator resolving group membership by username and by
/// group name.
#[async_trait]
pub trait GroupMembership: Send + Sync {
    /// The stable group IDs `username` belongs to, used by
    /// `ApprovalCoordinator::authorize` to intersect against an
    /// `ApprovalRequest`'s allow-list.
    async fn group_ids_for(&self, username: &str) -> Result<Vec<GroupId>, GroupMembershipError>;

    /// The member usernames of `group_name`, used to expand a
    /// `group:<name>` notification receiver into literal recipients.
    async fn members_of(&self, group_name: &str) -> Result<Vec<String>, GroupMembershipError>;
}

/// Fixed-table in-memory implementation for tests and local development.
#[derive(Default)]
pub struct InMemoryGroupMembership {
    memberships: RwLock<HashMap<String, Vec<GroupId>>>,
    groups: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryGroupMembership {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `username` as a member of `group_name`, keeping both
    /// lookup directions in sync.
    pub async fn add_member(&self, group_name: &str, username: &str) {
        self.memberships
            .write()
            .await
            .entry(username.to_string())
            .or_default()
            .push(GroupId::from(group_name));
        self.groups
            .write()
            .await
            .entry(group_name.to_string())
            .or_default()
            .push(username.to_string());
    }
}

#[async_trait]
impl GroupMembership for InMemoryGroupMembership {
    async fn group_ids_for(&self, username: &str) -> Result<Vec<GroupId>, GroupMembershipError> {
        Ok(self
            .memberships
            .read()
            .await
            .get(username)
            .cloned()
            .unwrap_or_default())
    }

    async fn members_of(&self, group_name: &str) -> Result<Vec<String>, GroupMembershipError> {
        Ok(self
            .groups
            .read()
            .await
            .get(group_name)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn group_ids_for_unknown_user_is_empty() {
        let membership = InMemoryGroupMembership::new();
        assert!(membership.group_ids_for("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_member_is_visible_from_both_directions() {
        let membership = InMemoryGroupMembership::new();
        membership.add_member("oncall", "alice").await;

        let ids = membership.group_ids_for("alice").await.unwrap();
        assert_eq!(ids, vec![GroupId::from("oncall")]);

        let members = membership.members_of("oncall").await.unwrap();
        assert_eq!(members, vec!["alice".to_string()]);
    }
}
