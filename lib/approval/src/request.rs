//! The `ApprovalRequest` entity: gates one `(exec_id, action_id)` pair on an
//! authorized decision.

use crate::error::ApprovalStoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowctl_authz::GroupId;
use flowctl_core::{ActionId, ApprovalId, ExecId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Status of an `ApprovalRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One entry in a request's allow-list: a specific user or any member of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Approver {
    User { username: String },
    Group { group_id: GroupId },
}

/// A gate on one `(exec_id, action_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub exec_id: ExecId,
    pub action_id: ActionId,
    pub requested_by: Option<UserId>,
    pub decided_by: Option<String>,
    pub status: ApprovalStatus,
    pub approvers: Vec<Approver>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Approver {
    /// Parses the same `group:<name>`-or-literal mini-language
    /// `NotifyBinding::receivers` uses.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("group:") {
            Some(name) => Self::Group {
                group_id: name.into(),
            },
            None => Self::User {
                username: raw.to_string(),
            },
        }
    }
}

impl ApprovalRequest {
    #[must_use]
    pub fn new(
        exec_id: ExecId,
        action_id: ActionId,
        requested_by: Option<UserId>,
        approvers: Vec<Approver>,
    ) -> Self {
        Self {
            id: ApprovalId::new(),
            exec_id,
            action_id,
            requested_by,
            decided_by: None,
            status: ApprovalStatus::Pending,
            approvers,
            created_at: Utc::now(),
            decided_at: None,
        }
    }
}

/// Durable storage for `ApprovalRequest` rows.
///
/// Implementations must enforce the "at most one non-terminal request per
/// (exec, action)" invariant and treat terminal decisions as immutable.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn create(&self, request: ApprovalRequest) -> Result<ApprovalRequest, ApprovalStoreError>;

    async fn get(&self, id: ApprovalId) -> Result<ApprovalRequest, ApprovalStoreError>;

    /// The non-terminal request for `(exec_id, action_id)`, if any.
    async fn find_pending(
        &self,
        exec_id: ExecId,
        action_id: &ActionId,
    ) -> Result<Option<ApprovalRequest>, ApprovalStoreError>;

    /// Idempotent against the same outcome; errors if already decided with a
    /// different outcome.
    async fn decide(
        &self,
        id: ApprovalId,
        decided_by: &str,
        outcome: ApprovalStatus,
    ) -> Result<ApprovalRequest, ApprovalStoreError>;
}

/// In-memory `ApprovalStore` for tests.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    requests: Mutex<HashMap<ApprovalId, ApprovalRequest>>,
}

impl InMemoryApprovalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn create(&self, request: ApprovalRequest) -> Result<ApprovalRequest, ApprovalStoreError> {
        let mut requests = self.requests.lock().expect("lock poisoned");
        if requests.values().any(|r| {
            r.exec_id == request.exec_id
                && r.action_id == request.action_id
                && r.status == ApprovalStatus::Pending
        }) {
            return Err(ApprovalStoreError::AlreadyPending {
                exec_id: request.exec_id,
                action_id: request.action_id,
            });
        }
        requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get(&self, id: ApprovalId) -> Result<ApprovalRequest, ApprovalStoreError> {
        self.requests
            .lock()
            .expect("lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(ApprovalStoreError::NotFound { id })
    }

    async fn find_pending(
        &self,
        exec_id: ExecId,
        action_id: &ActionId,
    ) -> Result<Option<ApprovalRequest>, ApprovalStoreError> {
        Ok(self
            .requests
            .lock()
            .expect("lock poisoned")
            .values()
            .find(|r| r.exec_id == exec_id && &r.action_id == action_id)
            .cloned())
    }

    async fn decide(
        &self,
        id: ApprovalId,
        decided_by: &str,
        outcome: ApprovalStatus,
    ) -> Result<ApprovalRequest, ApprovalStoreError> {
        let mut requests = self.requests.lock().expect("lock poisoned");
        let request = requests.get_mut(&id).ok_or(ApprovalStoreError::NotFound { id })?;

        if request.status.is_terminal() {
            if request.status == outcome {
                return Ok(request.clone());
            }
            return Err(ApprovalStoreError::AlreadyDecided { id });
        }

        request.status = outcome;
        request.decided_by = Some(decided_by.to_string());
        request.decided_at = Some(Utc::now());
        Ok(request.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recognizes_group_prefix() {
        assert_eq!(
            Approver::parse("group:oncall"),
            Approver::Group {
                group_id: "oncall".into()
            }
        );
        assert_eq!(
            Approver::parse("alice@example.com"),
            Approver::User {
                username: "alice@example.com".into()
            }
        );
    }

    fn sample_request() -> ApprovalRequest {
        ApprovalRequest::new(
            ExecId::new(),
            ActionId::new("deploy"),
            Some(UserId::new()),
            vec![Approver::User {
                username: "alice".into(),
            }],
        )
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryApprovalStore::new();
        let created = store.create(sample_request()).await.unwrap();
        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(created, fetched);
        assert_eq!(fetched.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn create_rejects_a_second_pending_request_for_same_pair() {
        let store = InMemoryApprovalStore::new();
        let first = sample_request();
        let exec_id = first.exec_id;
        let action_id = first.action_id.clone();
        store.create(first).await.unwrap();

        let second = ApprovalRequest::new(exec_id, action_id, None, vec![]);
        let err = store.create(second).await.unwrap_err();
        assert!(matches!(err, ApprovalStoreError::AlreadyPending { .. }));
    }

    #[tokio::test]
    async fn find_pending_locates_the_open_request() {
        let store = InMemoryApprovalStore::new();
        let request = sample_request();
        let exec_id = request.exec_id;
        let action_id = request.action_id.clone();
        store.create(request).await.unwrap();

        let found = store.find_pending(exec_id, &action_id).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn decide_transitions_pending_to_approved() {
        let store = InMemoryApprovalStore::new();
        let created = store.create(sample_request()).await.unwrap();

        let decided = store
            .decide(created.id, "alice", ApprovalStatus::Approved)
            .await
            .unwrap();
        assert_eq!(decided.status, ApprovalStatus::Approved);
        assert_eq!(decided.decided_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn decide_is_idempotent_against_the_same_outcome() {
        let store = InMemoryApprovalStore::new();
        let created = store.create(sample_request()).await.unwrap();
        store
            .decide(created.id, "alice", ApprovalStatus::Approved)
            .await
            .unwrap();

        let second = store
            .decide(created.id, "alice", ApprovalStatus::Approved)
            .await
            .unwrap();
        assert_eq!(second.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn decide_rejects_a_different_outcome_once_terminal() {
        let store = InMemoryApprovalStore::new();
        let created = store.create(sample_request()).await.unwrap();
        store
            .decide(created.id, "alice", ApprovalStatus::Approved)
            .await
            .unwrap();

        let err = store
            .decide(created.id, "alice", ApprovalStatus::Rejected)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalStoreError::AlreadyDecided { .. }));
    }
}
