//! The `ExecutionLog` state machine: one execution instance of one flow.

use crate::error::ExecutionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowctl_core::{ActionId, ExecId, FlowId, NamespaceId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;

/// How an execution was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
}

/// Status of an `ExecutionLog`, per the state machine in the component design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    PendingApproval,
    Completed,
    Errored,
    Cancelled,
}

impl ExecutionStatus {
    /// Whether this status is terminal: no further transitions are legal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }

    /// Whether `next` is a legal transition from `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Errored)
                | (Running, Cancelled)
                | (Running, PendingApproval)
                | (PendingApproval, Running)
                | (PendingApproval, Cancelled)
        )
    }
}

/// One execution instance of one flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    /// Correlation key across queue, log stream, approvals, and artifacts.
    pub exec_id: ExecId,
    /// The flow this executes.
    pub flow_id: FlowId,
    /// Owning namespace.
    pub namespace_id: NamespaceId,
    /// Submitted input, serialized.
    pub input: JsonValue,
    /// Who (or what scheduled trigger) started this execution.
    pub triggered_by: Option<UserId>,
    /// How this execution was started.
    pub trigger_type: TriggerType,
    /// The action currently executing or last attempted.
    pub current_action_id: Option<ActionId>,
    /// Current status.
    pub status: ExecutionStatus,
    /// Error message, set when `status == Errored`.
    pub error: Option<String>,
    /// Flat map of merged action outputs, keyed per the `key`/`key@node` rule.
    #[serde(default)]
    pub outputs: HashMap<String, JsonValue>,
    /// Optimistic-concurrency version, incremented on every committed transition.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionLog {
    /// Creates a new execution log in `pending` status.
    #[must_use]
    pub fn new(
        flow_id: FlowId,
        namespace_id: NamespaceId,
        input: JsonValue,
        triggered_by: Option<UserId>,
        trigger_type: TriggerType,
    ) -> Self {
        let now = Utc::now();
        Self {
            exec_id: ExecId::new(),
            flow_id,
            namespace_id,
            input,
            triggered_by,
            trigger_type,
            current_action_id: None,
            status: ExecutionStatus::Pending,
            error: None,
            outputs: HashMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attempts to commit a status transition, bumping `version`.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::VersionConflict` is not produced here (that
    /// is a store-layer concern on read-modify-write); this only rejects
    /// transitions the state machine disallows.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), ExecutionError> {
        if !self.status.can_transition_to(next) {
            return Err(ExecutionError::LogWriteFailed {
                reason: format!("illegal transition {:?} -> {:?}", self.status, next),
            });
        }
        self.status = next;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Durable store for `ExecutionLog` rows, keyed by `exec_id`.
///
/// Implementations must enforce optimistic concurrency: `update` fails if
/// the caller's `expected_version` does not match the stored row's current
/// version.
#[async_trait]
pub trait ExecutionLogStore: Send + Sync {
    /// Inserts a new execution log row.
    async fn create(&self, log: ExecutionLog) -> Result<(), ExecutionError>;

    /// Fetches the current row for `exec_id`.
    async fn get(&self, exec_id: ExecId) -> Result<ExecutionLog, ExecutionError>;

    /// Replaces the row for `log.exec_id`, failing if `expected_version`
    /// does not match the currently stored version.
    async fn update(
        &self,
        log: ExecutionLog,
        expected_version: i64,
    ) -> Result<(), ExecutionError>;
}

/// In-memory `ExecutionLogStore` for tests.
#[derive(Default)]
pub struct InMemoryExecutionLogStore {
    rows: Mutex<HashMap<ExecId, ExecutionLog>>,
}

impl InMemoryExecutionLogStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionLogStore for InMemoryExecutionLogStore {
    async fn create(&self, log: ExecutionLog) -> Result<(), ExecutionError> {
        self.rows.lock().expect("lock poisoned").insert(log.exec_id, log);
        Ok(())
    }

    async fn get(&self, exec_id: ExecId) -> Result<ExecutionLog, ExecutionError> {
        self.rows
            .lock()
            .expect("lock poisoned")
            .get(&exec_id)
            .cloned()
            .ok_or(ExecutionError::VersionConflict { exec_id })
    }

    async fn update(
        &self,
        log: ExecutionLog,
        expected_version: i64,
    ) -> Result<(), ExecutionError> {
        let mut rows = self.rows.lock().expect("lock poisoned");
        let current = rows
            .get(&log.exec_id)
            .ok_or(ExecutionError::VersionConflict {
                exec_id: log.exec_id,
            })?;
        if current.version != expected_version {
            return Err(ExecutionError::VersionConflict {
                exec_id: log.exec_id,
            });
        }
        rows.insert(log.exec_id, log);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> ExecutionLog {
        ExecutionLog::new(
            FlowId::new("nightly", 1),
            NamespaceId::new(),
            serde_json::json!({}),
            Some(UserId::new()),
            TriggerType::Manual,
        )
    }

    #[test]
    fn fresh_log_is_pending() {
        let log = sample_log();
        assert_eq!(log.status, ExecutionStatus::Pending);
        assert_eq!(log.version, 0);
    }

    #[test]
    fn transition_pending_to_running_bumps_version() {
        let mut log = sample_log();
        log.transition(ExecutionStatus::Running).unwrap();
        assert_eq!(log.status, ExecutionStatus::Running);
        assert_eq!(log.version, 1);
    }

    #[test]
    fn transition_completed_to_running_is_rejected() {
        let mut log = sample_log();
        log.transition(ExecutionStatus::Running).unwrap();
        log.transition(ExecutionStatus::Completed).unwrap();
        assert!(log.transition(ExecutionStatus::Running).is_err());
    }

    #[test]
    fn approval_pause_and_resume_round_trip() {
        let mut log = sample_log();
        log.transition(ExecutionStatus::Running).unwrap();
        log.transition(ExecutionStatus::PendingApproval).unwrap();
        log.transition(ExecutionStatus::Running).unwrap();
        log.transition(ExecutionStatus::Completed).unwrap();
        assert_eq!(log.status, ExecutionStatus::Completed);
        assert_eq!(log.version, 4);
    }

    #[test]
    fn cancelled_never_returns_to_running() {
        let terminal = ExecutionStatus::Cancelled;
        assert!(!terminal.can_transition_to(ExecutionStatus::Running));
        assert!(!terminal.can_transition_to(ExecutionStatus::Completed));
    }

    #[tokio::test]
    async fn store_update_rejects_stale_version() {
        let store = InMemoryExecutionLogStore::new();
        let log = sample_log();
        let exec_id = log.exec_id;
        store.create(log.clone()).await.unwrap();

        let mut stale = log.clone();
        stale.transition(ExecutionStatus::Running).unwrap();
        store.update(stale.clone(), 0).await.unwrap();

        let mut conflicting = log;
        conflicting.transition(ExecutionStatus::Running).unwrap();
        let err = store.update(conflicting, 0).await.unwrap_err();
        assert!(matches!(err, ExecutionError::VersionConflict { .. }));

        let current = store.get(exec_id).await.unwrap();
        assert_eq!(current.version, 1);
    }
}
