//! Postgres-backed `ApprovalStore`, durable across coordinator restarts.
//!
//! The "at most one pending request per `(exec_id, action_id)`" invariant
//! is enforced by a partial unique index (see `migrations/`) rather than a
//! check-then-insert race; `create` maps its unique-violation into
//! `ApprovalStoreError::AlreadyPending`.

use crate::error::ApprovalStoreError;
use crate::request::{ApprovalRequest, ApprovalStatus, ApprovalStore, Approver};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowctl_core::{ActionId, ApprovalId, ExecId, UserId};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

fn status_str(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Rejected => "rejected",
    }
}

fn status_from_str(s: &str) -> ApprovalStatus {
    match s {
        "approved" => ApprovalStatus::Approved,
        "rejected" => ApprovalStatus::Rejected,
        _ => ApprovalStatus::Pending,
    }
}

#[derive(FromRow)]
struct ApprovalRow {
    id: uuid::Uuid,
    exec_id: uuid::Uuid,
    action_id: String,
    requested_by: Option<String>,
    decided_by: Option<String>,
    status: String,
    approvers: serde_json::Value,
    created_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRow {
    fn try_into_request(self) -> Result<ApprovalRequest, ApprovalStoreError> {
        let id = ApprovalId::from_uuid(self.id);
        let requested_by = self
            .requested_by
            .map(|raw| UserId::from_str(&raw))
            .transpose()
            .map_err(|e| ApprovalStoreError::StorageFailed {
                reason: format!("invalid requested_by id: {e}"),
            })?;
        let approvers: Vec<Approver> = serde_json::from_value(self.approvers).map_err(|e| {
            ApprovalStoreError::StorageFailed {
                reason: format!("invalid approvers json: {e}"),
            }
        })?;

        Ok(ApprovalRequest {
            id,
            exec_id: ExecId::from_uuid(self.exec_id),
            action_id: ActionId::new(self.action_id),
            requested_by,
            decided_by: self.decided_by,
            status: status_from_str(&self.status),
            approvers,
            created_at: self.created_at,
            decided_at: self.decided_at,
        })
    }
}

/// `ApprovalStore` backed by an `approval_requests` table in PostgreSQL
/// (see `migrations/`).
pub struct PgApprovalStore {
    pool: PgPool,
}

impl PgApprovalStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApprovalStore for PgApprovalStore {
    async fn create(&self, request: ApprovalRequest) -> Result<ApprovalRequest, ApprovalStoreError> {
        let approvers = serde_json::to_value(&request.approvers).expect("approvers always serialize");

        sqlx::query(
            r#"
            INSERT INTO approval_requests
                (id, exec_id, action_id, requested_by, decided_by, status, approvers, created_at, decided_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.exec_id.as_uuid())
        .bind(request.action_id.as_str())
        .bind(request.requested_by.map(|id| id.to_string()))
        .bind(&request.decided_by)
        .bind(status_str(request.status))
        .bind(&approvers)
        .bind(request.created_at)
        .bind(request.decided_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => ApprovalStoreError::AlreadyPending {
                exec_id: request.exec_id,
                action_id: request.action_id.clone(),
            },
            e => ApprovalStoreError::StorageFailed { reason: e.to_string() },
        })?;

        Ok(request)
    }

    async fn get(&self, id: ApprovalId) -> Result<ApprovalRequest, ApprovalStoreError> {
        let row: Option<ApprovalRow> = sqlx::query_as(
            r#"
            SELECT id, exec_id, action_id, requested_by, decided_by, status, approvers, created_at, decided_at
            FROM approval_requests
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApprovalStoreError::StorageFailed { reason: e.to_string() })?;

        row.ok_or(ApprovalStoreError::NotFound { id })?.try_into_request()
    }

    async fn find_pending(
        &self,
        exec_id: ExecId,
        action_id: &ActionId,
    ) -> Result<Option<ApprovalRequest>, ApprovalStoreError> {
        let row: Option<ApprovalRow> = sqlx::query_as(
            r#"
            SELECT id, exec_id, action_id, requested_by, decided_by, status, approvers, created_at, decided_at
            FROM approval_requests
            WHERE exec_id = $1 AND action_id = $2 AND status = 'pending'
            "#,
        )
        .bind(exec_id.as_uuid())
        .bind(action_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApprovalStoreError::StorageFailed { reason: e.to_string() })?;

        row.map(ApprovalRow::try_into_request).transpose()
    }

    async fn decide(
        &self,
        id: ApprovalId,
        decided_by: &str,
        outcome: ApprovalStatus,
    ) -> Result<ApprovalRequest, ApprovalStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ApprovalStoreError::StorageFailed { reason: e.to_string() })?;

        let row: Option<ApprovalRow> = sqlx::query_as(
            r#"
            SELECT id, exec_id, action_id, requested_by, decided_by, status, approvers, created_at, decided_at
            FROM approval_requests
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ApprovalStoreError::StorageFailed { reason: e.to_string() })?;

        let current = row.ok_or(ApprovalStoreError::NotFound { id })?.try_into_request()?;

        if current.status.is_terminal() {
            if current.status == outcome {
                return Ok(current);
            }
            return Err(ApprovalStoreError::AlreadyDecided { id });
        }

        let decided_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE approval_requests
            SET status = $2, decided_by = $3, decided_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(status_str(outcome))
        .bind(decided_by)
        .bind(decided_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApprovalStoreError::StorageFailed { reason: e.to_string() })?;

        tx.commit()
            .await
            .map_err(|e| ApprovalStoreError::StorageFailed { reason: e.to_string() })?;

        Ok(ApprovalRequest {
            status: outcome,
            decided_by: Some(decided_by.to_string()),
            decided_at: Some(decided_at),
            ..current
        })
    }
}
