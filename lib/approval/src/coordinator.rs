//! The Approval Coordinator: a stateless contract over the `ApprovalStore`
//! implementing `request`/`decide`/`authorize` (spec-facing §4.8), plus a
//! read-through cache to reduce store pressure on repeated `request` polls.

use crate::error::ApprovalError;
use crate::request::{ApprovalRequest, ApprovalStatus, ApprovalStore, Approver};
use chrono::{DateTime, Duration, Utc};
use flowctl_authz::GroupMembership;
use flowctl_core::{ActionId, ApprovalId, ExecId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

fn cache_ttl() -> Duration {
    Duration::hours(1)
}

/// Outcome a caller uses to decide whether to continue, fail, or pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Approved,
    Rejected { reason: String },
    Pending { id: ApprovalId },
}

struct CacheEntry {
    request: ApprovalRequest,
    cached_at: DateTime<Utc>,
}

/// Coordinates approval requests and decisions, consulting `GroupMembership`
/// to resolve a decider's group IDs for `authorize`.
pub struct ApprovalCoordinator {
    store: Arc<dyn ApprovalStore>,
    group_membership: Arc<dyn GroupMembership>,
    by_id: RwLock<HashMap<ApprovalId, CacheEntry>>,
    by_exec_action: RwLock<HashMap<(ExecId, ActionId), ApprovalId>>,
}

impl ApprovalCoordinator {
    #[must_use]
    pub fn new(store: Arc<dyn ApprovalStore>, group_membership: Arc<dyn GroupMembership>) -> Self {
        Self {
            store,
            group_membership,
            by_id: RwLock::new(HashMap::new()),
            by_exec_action: RwLock::new(HashMap::new()),
        }
    }

    async fn cache_put(&self, request: ApprovalRequest) {
        let entry = CacheEntry {
            request: request.clone(),
            cached_at: Utc::now(),
        };
        self.by_exec_action
            .write()
            .await
            .insert((request.exec_id, request.action_id.clone()), request.id);
        self.by_id.write().await.insert(request.id, entry);
    }

    async fn cache_get_by_id(&self, id: ApprovalId) -> Option<ApprovalRequest> {
        let cache = self.by_id.read().await;
        let entry = cache.get(&id)?;
        if Utc::now() - entry.cached_at > cache_ttl() {
            return None;
        }
        Some(entry.request.clone())
    }

    /// Create-if-absent for `(exec_id, action_id)`, returning the gate
    /// outcome the caller should act on.
    pub async fn request(
        &self,
        exec_id: ExecId,
        action_id: ActionId,
        requested_by: Option<UserId>,
        approvers: Vec<Approver>,
    ) -> Result<GateOutcome, ApprovalError> {
        if let Some(id) = self.by_exec_action.read().await.get(&(exec_id, action_id.clone())).copied() {
            if let Some(request) = self.cache_get_by_id(id).await {
                return Ok(Self::outcome_for(&request));
            }
        }

        let existing = self
            .store
            .find_pending(exec_id, &action_id)
            .await
            .map_err(|_| ApprovalError::Store {
                exec_id,
                action_id: action_id.clone(),
            })?;

        let request = match existing {
            Some(request) => request,
            None => {
                let created = ApprovalRequest::new(exec_id, action_id.clone(), requested_by, approvers);
                self.store
                    .create(created)
                    .await
                    .map_err(|_| ApprovalError::Store { exec_id, action_id })?
            }
        };

        self.cache_put(request.clone()).await;
        Ok(Self::outcome_for(&request))
    }

    fn outcome_for(request: &ApprovalRequest) -> GateOutcome {
        match request.status {
            ApprovalStatus::Approved => GateOutcome::Approved,
            ApprovalStatus::Rejected => GateOutcome::Rejected {
                reason: format!(
                    "approval request {} for action '{}' rejected by {}",
                    request.id,
                    request.action_id,
                    request.decided_by.as_deref().unwrap_or("unknown")
                ),
            },
            ApprovalStatus::Pending => GateOutcome::Pending { id: request.id },
        }
    }

    /// Records a decision after checking `authorize`.
    pub async fn decide(
        &self,
        id: ApprovalId,
        decider: &str,
        outcome: ApprovalStatus,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let request = self.store.get(id).await.map_err(|_| ApprovalError::RequestNotFound { id })?;

        if !self.authorize(decider, &request.approvers).await? {
            return Err(ApprovalError::NotAuthorized {
                id,
                decider: decider.to_string(),
            });
        }

        let decided = self
            .store
            .decide(id, decider, outcome)
            .await
            .map_err(|_| ApprovalError::Store {
                exec_id: request.exec_id,
                action_id: request.action_id.clone(),
            })?;

        self.cache_put(decided.clone()).await;
        Ok(decided)
    }

    /// True iff `decider` is directly named in `approvers`, or belongs to
    /// one of the groups `approvers` names.
    pub async fn authorize(&self, decider: &str, approvers: &[Approver]) -> Result<bool, ApprovalError> {
        let named = approvers
            .iter()
            .any(|a| matches!(a, Approver::User { username } if username == decider));
        if named {
            return Ok(true);
        }

        let group_ids: Vec<_> = approvers
            .iter()
            .filter_map(|a| match a {
                Approver::Group { group_id } => Some(group_id.clone()),
                Approver::User { .. } => None,
            })
            .collect();
        if group_ids.is_empty() {
            return Ok(false);
        }

        let decider_groups = self
            .group_membership
            .group_ids_for(decider)
            .await
            .unwrap_or_default();

        Ok(decider_groups.iter().any(|g| group_ids.contains(g)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::InMemoryApprovalStore;
    use flowctl_authz::InMemoryGroupMembership;

    fn coordinator() -> ApprovalCoordinator {
        ApprovalCoordinator::new(
            Arc::new(InMemoryApprovalStore::new()),
            Arc::new(InMemoryGroupMembership::new()),
        )
    }

    #[tokio::test]
    async fn request_creates_and_returns_pending() {
        let coordinator = coordinator();
        let outcome = coordinator
            .request(ExecId::new(), ActionId::new("deploy"), None, vec![])
            .await
            .unwrap();
        assert!(matches!(outcome, GateOutcome::Pending { .. }));
    }

    #[tokio::test]
    async fn request_is_idempotent_for_the_same_pair() {
        let coordinator = coordinator();
        let exec_id = ExecId::new();
        let action_id = ActionId::new("deploy");
        let first = coordinator
            .request(exec_id, action_id.clone(), None, vec![])
            .await
            .unwrap();
        let second = coordinator
            .request(exec_id, action_id, None, vec![])
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn decide_by_named_user_then_request_returns_approved() {
        let coordinator = coordinator();
        let exec_id = ExecId::new();
        let action_id = ActionId::new("deploy");
        let outcome = coordinator
            .request(
                exec_id,
                action_id.clone(),
                None,
                vec![Approver::User {
                    username: "alice".into(),
                }],
            )
            .await
            .unwrap();
        let GateOutcome::Pending { id } = outcome else {
            panic!("expected pending")
        };

        coordinator.decide(id, "alice", ApprovalStatus::Approved).await.unwrap();

        let outcome = coordinator.request(exec_id, action_id, None, vec![]).await.unwrap();
        assert_eq!(outcome, GateOutcome::Approved);
    }

    #[tokio::test]
    async fn decide_by_unauthorized_user_is_rejected_at_the_gate() {
        let coordinator = coordinator();
        let exec_id = ExecId::new();
        let action_id = ActionId::new("deploy");
        let outcome = coordinator
            .request(
                exec_id,
                action_id,
                None,
                vec![Approver::User {
                    username: "alice".into(),
                }],
            )
            .await
            .unwrap();
        let GateOutcome::Pending { id } = outcome else {
            panic!("expected pending")
        };

        let err = coordinator
            .decide(id, "mallory", ApprovalStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotAuthorized { .. }));
    }

    #[tokio::test]
    async fn authorize_matches_via_group_membership() {
        let membership = Arc::new(InMemoryGroupMembership::new());
        membership.add_member("oncall", "bob").await;
        let coordinator = ApprovalCoordinator::new(Arc::new(InMemoryApprovalStore::new()), membership);

        let allowed = coordinator
            .authorize(
                "bob",
                &[Approver::Group {
                    group_id: "oncall".into(),
                }],
            )
            .await
            .unwrap();
        assert!(allowed);

        let denied = coordinator
            .authorize(
                "carol",
                &[Approver::Group {
                    group_id: "oncall".into(),
                }],
            )
            .await
            .unwrap();
        assert!(!denied);
    }

    #[tokio::test]
    async fn decide_rejecting_surfaces_as_rejected_with_reason() {
        let coordinator = coordinator();
        let exec_id = ExecId::new();
        let action_id = ActionId::new("deploy");
        let outcome = coordinator
            .request(
                exec_id,
                action_id.clone(),
                None,
                vec![Approver::User {
                    username: "alice".into(),
                }],
            )
            .await
            .unwrap();
        let GateOutcome::Pending { id } = outcome else {
            panic!("expected pending")
        };

        coordinator.decide(id, "alice", ApprovalStatus::Rejected).await.unwrap();

        let outcome = coordinator.request(exec_id, action_id, None, vec![]).await.unwrap();
        assert!(matches!(outcome, GateOutcome::Rejected { .. }));
    }
}
