//! Postgres-backed `ExecutionLogStore`, durable across coordinator restarts.
//!
//! `update` enforces optimistic concurrency with a `WHERE version = $expected`
//! clause; zero rows affected maps to `ExecutionError::VersionConflict`.

use crate::error::ExecutionError;
use crate::execution::{ExecutionLog, ExecutionLogStore, ExecutionStatus, TriggerType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowctl_core::{ActionId, ExecId, FlowId, NamespaceId, UserId};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::str::FromStr;

fn trigger_type_str(t: TriggerType) -> &'static str {
    match t {
        TriggerType::Manual => "manual",
        TriggerType::Scheduled => "scheduled",
    }
}

fn trigger_type_from_str(s: &str) -> TriggerType {
    match s {
        "scheduled" => TriggerType::Scheduled,
        _ => TriggerType::Manual,
    }
}

fn status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Running => "running",
        ExecutionStatus::PendingApproval => "pending_approval",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Errored => "errored",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(s: &str) -> ExecutionStatus {
    match s {
        "running" => ExecutionStatus::Running,
        "pending_approval" => ExecutionStatus::PendingApproval,
        "completed" => ExecutionStatus::Completed,
        "errored" => ExecutionStatus::Errored,
        "cancelled" => ExecutionStatus::Cancelled,
        _ => ExecutionStatus::Pending,
    }
}

#[derive(FromRow)]
struct ExecutionLogRow {
    exec_id: uuid::Uuid,
    namespace_id: uuid::Uuid,
    flow_slug: String,
    flow_db_id: i64,
    input: JsonValue,
    trigger_type: String,
    triggered_by: Option<String>,
    current_action_id: Option<String>,
    status: String,
    error: Option<String>,
    outputs: JsonValue,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ExecutionLogRow {
    fn try_into_log(self) -> Result<ExecutionLog, ExecutionError> {
        let triggered_by = self
            .triggered_by
            .map(|raw| UserId::from_str(&raw))
            .transpose()
            .map_err(|e| ExecutionError::LogWriteFailed {
                reason: format!("invalid triggered_by id: {e}"),
            })?;

        let outputs: HashMap<String, JsonValue> = serde_json::from_value(self.outputs).map_err(|e| {
            ExecutionError::LogWriteFailed {
                reason: format!("invalid outputs json: {e}"),
            }
        })?;

        Ok(ExecutionLog {
            exec_id: ExecId::from_uuid(self.exec_id),
            flow_id: FlowId::new(self.flow_slug, self.flow_db_id),
            namespace_id: NamespaceId::from_uuid(self.namespace_id),
            input: self.input,
            triggered_by,
            trigger_type: trigger_type_from_str(&self.trigger_type),
            current_action_id: self.current_action_id.map(ActionId::new),
            status: status_from_str(&self.status),
            error: self.error,
            outputs,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// `ExecutionLogStore` backed by an `execution_log` table in PostgreSQL
/// (see `migrations/`).
pub struct PgExecutionLogStore {
    pool: PgPool,
}

impl PgExecutionLogStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLogStore for PgExecutionLogStore {
    async fn create(&self, log: ExecutionLog) -> Result<(), ExecutionError> {
        let outputs = serde_json::to_value(&log.outputs).map_err(|e| ExecutionError::LogWriteFailed {
            reason: format!("outputs serialization failed: {e}"),
        })?;

        sqlx::query(
            r#"
            INSERT INTO execution_log
                (exec_id, namespace_id, flow_slug, flow_db_id, input, trigger_type, triggered_by,
                 current_action_id, status, error, outputs, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(log.exec_id.as_uuid())
        .bind(log.namespace_id.as_uuid())
        .bind(&log.flow_id.slug)
        .bind(log.flow_id.db_id)
        .bind(&log.input)
        .bind(trigger_type_str(log.trigger_type))
        .bind(log.triggered_by.map(|id| id.to_string()))
        .bind(log.current_action_id.map(|id| id.to_string()))
        .bind(status_str(log.status))
        .bind(&log.error)
        .bind(&outputs)
        .bind(log.version)
        .bind(log.created_at)
        .bind(log.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ExecutionError::LogWriteFailed { reason: e.to_string() })?;

        Ok(())
    }

    async fn get(&self, exec_id: ExecId) -> Result<ExecutionLog, ExecutionError> {
        let row: Option<ExecutionLogRow> = sqlx::query_as(
            r#"
            SELECT exec_id, namespace_id, flow_slug, flow_db_id, input, trigger_type, triggered_by,
                   current_action_id, status, error, outputs, version, created_at, updated_at
            FROM execution_log
            WHERE exec_id = $1
            "#,
        )
        .bind(exec_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| ExecutionError::VersionConflict { exec_id })?;

        row.ok_or(ExecutionError::VersionConflict { exec_id })?.try_into_log()
    }

    async fn update(&self, log: ExecutionLog, expected_version: i64) -> Result<(), ExecutionError> {
        let outputs = serde_json::to_value(&log.outputs).map_err(|e| ExecutionError::LogWriteFailed {
            reason: format!("outputs serialization failed: {e}"),
        })?;

        let result = sqlx::query(
            r#"
            UPDATE execution_log
            SET status = $3, error = $4, current_action_id = $5, outputs = $6,
                version = $7, updated_at = $8
            WHERE exec_id = $1 AND version = $2
            "#,
        )
        .bind(log.exec_id.as_uuid())
        .bind(expected_version)
        .bind(status_str(log.status))
        .bind(&log.error)
        .bind(log.current_action_id.map(|id| id.to_string()))
        .bind(&outputs)
        .bind(log.version)
        .bind(log.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ExecutionError::LogWriteFailed { reason: e.to_string() })?;

        if result.rows_affected() == 0 {
            return Err(ExecutionError::VersionConflict { exec_id: log.exec_id });
        }
        Ok(())
    }
}
