//! Postgres-backed `JobStore`, durable across coordinator restarts.
//!
//! Claiming a job is a single `UPDATE ... WHERE id = (SELECT ... FOR UPDATE
//! SKIP LOCKED)` statement so two workers polling the same payload type
//! never race each other onto the same row.

use crate::error::JobStoreError;
use crate::job::{Job, JobStatus, JobStore, PayloadType};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowctl_core::{ExecId, JobId};
use sqlx::{FromRow, PgPool};

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Claimed => "claimed",
        JobStatus::Done => "done",
        JobStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(s: &str) -> JobStatus {
    match s {
        "claimed" => JobStatus::Claimed,
        "done" => JobStatus::Done,
        "cancelled" => JobStatus::Cancelled,
        _ => JobStatus::Pending,
    }
}

#[derive(FromRow)]
struct JobRow {
    id: i64,
    exec_id: uuid::Uuid,
    payload_type: String,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    scheduled_at: DateTime<Utc>,
    max_retries: i32,
    attempt: i32,
    lock_holder: Option<String>,
    lock_expiry: Option<DateTime<Utc>>,
    status: String,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: JobId::new(row.id),
            exec_id: ExecId::from_uuid(row.exec_id),
            payload_type: PayloadType::new(row.payload_type),
            payload: row.payload,
            created_at: row.created_at,
            scheduled_at: row.scheduled_at,
            max_retries: row.max_retries as u32,
            attempt: row.attempt as u32,
            lock_holder: row.lock_holder,
            lock_expiry: row.lock_expiry,
            status: status_from_str(&row.status),
        }
    }
}

/// `JobStore` backed by a `jobs` table in PostgreSQL (see `migrations/`).
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn put(&self, job: Job) -> Result<JobId, JobStoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO jobs
                (exec_id, payload_type, payload, created_at, scheduled_at, max_retries, attempt, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(job.exec_id.as_uuid())
        .bind(job.payload_type.as_str())
        .bind(&job.payload)
        .bind(job.created_at)
        .bind(job.scheduled_at)
        .bind(job.max_retries as i32)
        .bind(job.attempt as i32)
        .bind(status_str(job.status))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| JobStoreError::StorageFailed { reason: e.to_string() })?;

        Ok(JobId::new(row.0))
    }

    async fn get_by_payload_type(
        &self,
        payload_type: &PayloadType,
        lock_holder: &str,
        lease_ttl: Duration,
    ) -> Result<Job, JobStoreError> {
        let now = Utc::now();
        let lock_expiry = now + lease_ttl;

        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'claimed', lock_holder = $1, lock_expiry = $2
            WHERE id = (
                SELECT id FROM jobs
                WHERE payload_type = $3 AND status = 'pending' AND scheduled_at <= $4
                ORDER BY scheduled_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, exec_id, payload_type, payload, created_at, scheduled_at,
                      max_retries, attempt, lock_holder, lock_expiry, status
            "#,
        )
        .bind(lock_holder)
        .bind(lock_expiry)
        .bind(payload_type.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| JobStoreError::StorageFailed { reason: e.to_string() })?;

        row.map(Job::from).ok_or(JobStoreError::NoJobs)
    }

    async fn complete(&self, id: JobId) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'done', lock_holder = NULL, lock_expiry = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::StorageFailed { reason: e.to_string() })?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound { id });
        }
        Ok(())
    }

    async fn cancel_by_exec_id(&self, exec_id: ExecId) -> Result<u32, JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'cancelled', lock_holder = NULL, lock_expiry = NULL
            WHERE exec_id = $1 AND status NOT IN ('done', 'cancelled')
            "#,
        )
        .bind(exec_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::StorageFailed { reason: e.to_string() })?;

        Ok(result.rows_affected() as u32)
    }

    async fn initialize(&self) -> Result<u32, JobStoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', attempt = attempt + 1, lock_holder = NULL, lock_expiry = NULL
            WHERE status = 'claimed' AND lock_expiry IS NOT NULL AND lock_expiry < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::StorageFailed { reason: e.to_string() })?;

        Ok(result.rows_affected() as u32)
    }
}
