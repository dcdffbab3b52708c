//! The Job Store: a durable, FIFO-by-`(scheduled_at, id)` queue with
//! lease-based visibility.

use crate::error::JobStoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowctl_core::{ExecId, JobId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// The queue routing tag selecting a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadType(pub String);

impl PayloadType {
    /// Creates a payload type tag.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PayloadType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status of a queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker to claim it.
    Pending,
    /// Claimed by a worker holding an unexpired lease.
    Claimed,
    /// Terminal: handled successfully.
    Done,
    /// Terminal: cancelled by exec-ID.
    Cancelled,
}

impl JobStatus {
    /// Whether this status is terminal (no further transitions).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

/// A queue row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Monotonic row ID, assigned by the store on `put`.
    pub id: JobId,
    /// Correlates to an `ExecutionLog` when the payload is a flow execution.
    pub exec_id: ExecId,
    /// Routing tag selecting a handler.
    pub payload_type: PayloadType,
    /// Opaque, handler-defined payload bytes (typically JSON).
    pub payload: Vec<u8>,
    /// When this row was inserted.
    pub created_at: DateTime<Utc>,
    /// Visibility time; the row is not claimable before this instant.
    pub scheduled_at: DateTime<Utc>,
    /// Maximum number of retries before the job is abandoned.
    pub max_retries: u32,
    /// Current attempt number, starting at 0.
    pub attempt: u32,
    /// Identifier of the worker holding the current lease, if claimed.
    pub lock_holder: Option<String>,
    /// When the current lease expires.
    pub lock_expiry: Option<DateTime<Utc>>,
    /// Current status.
    pub status: JobStatus,
}

impl Job {
    /// Builds a new, unscheduled (visible immediately) pending job.
    #[must_use]
    pub fn new(exec_id: ExecId, payload_type: PayloadType, payload: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(0),
            exec_id,
            payload_type,
            payload,
            created_at: now,
            scheduled_at: now,
            max_retries: 0,
            attempt: 0,
            lock_holder: None,
            lock_expiry: None,
            status: JobStatus::Pending,
        }
    }

    /// Builder: sets `max_retries`.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder: delays visibility until `scheduled_at`.
    #[must_use]
    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = scheduled_at;
        self
    }

    /// Whether the handler contract permits another retry attempt.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.attempt < self.max_retries
    }
}

/// Durable, lease-based job queue.
///
/// Implementations must guarantee at-least-once delivery: a crashed
/// worker's unrenewed lease eventually expires and the job is reclaimed by
/// `initialize`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new job as `pending`.
    async fn put(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Atomically claims the oldest ready job of `payload_type`, marking it
    /// `claimed` with a lease expiring at `now + lease_ttl`.
    ///
    /// Returns `Err(JobStoreError::NoJobs)` when none are ready.
    async fn get_by_payload_type(
        &self,
        payload_type: &PayloadType,
        lock_holder: &str,
        lease_ttl: Duration,
    ) -> Result<Job, JobStoreError>;

    /// Marks a claimed job `done`, releasing its lease.
    async fn complete(&self, id: JobId) -> Result<(), JobStoreError>;

    /// Transitions every non-terminal job with matching exec-ID to `cancelled`.
    async fn cancel_by_exec_id(&self, exec_id: ExecId) -> Result<u32, JobStoreError>;

    /// Reclaims jobs whose leases expired back to `pending`, incrementing
    /// their attempt count. Runs at startup and MAY run periodically.
    async fn initialize(&self) -> Result<u32, JobStoreError>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    jobs: Vec<Job>,
    next_id: i64,
}

/// In-memory `JobStore` for tests.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryJobStore {
    /// Creates an empty in-memory job store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row currently held, for test assertions.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Job> {
        self.state.lock().expect("lock poisoned").jobs.clone()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put(&self, mut job: Job) -> Result<JobId, JobStoreError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.next_id += 1;
        job.id = JobId::new(state.next_id);
        let id = job.id;
        state.jobs.push(job);
        Ok(id)
    }

    async fn get_by_payload_type(
        &self,
        payload_type: &PayloadType,
        lock_holder: &str,
        lease_ttl: Duration,
    ) -> Result<Job, JobStoreError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let now = Utc::now();
        let candidate = state
            .jobs
            .iter_mut()
            .filter(|j| {
                j.payload_type == *payload_type
                    && j.status == JobStatus::Pending
                    && j.scheduled_at <= now
            })
            .min_by_key(|j| (j.scheduled_at, j.id.as_i64()));

        let Some(job) = candidate else {
            return Err(JobStoreError::NoJobs);
        };

        job.status = JobStatus::Claimed;
        job.lock_holder = Some(lock_holder.to_string());
        job.lock_expiry = Some(now + lease_ttl);
        Ok(job.clone())
    }

    async fn complete(&self, id: JobId) -> Result<(), JobStoreError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(JobStoreError::NotFound { id })?;
        job.status = JobStatus::Done;
        job.lock_holder = None;
        job.lock_expiry = None;
        Ok(())
    }

    async fn cancel_by_exec_id(&self, exec_id: ExecId) -> Result<u32, JobStoreError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let mut count = 0;
        for job in state
            .jobs
            .iter_mut()
            .filter(|j| j.exec_id == exec_id && !j.status.is_terminal())
        {
            job.status = JobStatus::Cancelled;
            job.lock_holder = None;
            job.lock_expiry = None;
            count += 1;
        }
        Ok(count)
    }

    async fn initialize(&self) -> Result<u32, JobStoreError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let now = Utc::now();
        let mut reclaimed = 0;
        for job in state.jobs.iter_mut().filter(|j| {
            j.status == JobStatus::Claimed && j.lock_expiry.is_some_and(|exp| exp < now)
        }) {
            job.status = JobStatus::Pending;
            job.attempt += 1;
            job.lock_holder = None;
            job.lock_expiry = None;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }
}

/// Per-attempt retry backoff, capped at `max_delay`.
///
/// `backoff(attempt) = min(initial_delay * backoff_factor^attempt, max_delay)`.
#[must_use]
pub fn backoff(attempt: u32, initial_delay: Duration, backoff_factor: f64, max_delay: Duration) -> Duration {
    let scaled_ms = initial_delay.num_milliseconds() as f64 * backoff_factor.powi(attempt as i32);
    let capped_ms = scaled_ms.min(max_delay.num_milliseconds() as f64);
    Duration::milliseconds(capped_ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(payload_type: &str) -> Job {
        Job::new(ExecId::new(), PayloadType::new(payload_type), b"{}".to_vec())
    }

    #[tokio::test]
    async fn put_assigns_monotonic_ids() {
        let store = InMemoryJobStore::new();
        let first = store.put(sample_job("exec_flow")).await.unwrap();
        let second = store.put(sample_job("exec_flow")).await.unwrap();
        assert!(second.as_i64() > first.as_i64());
    }

    #[tokio::test]
    async fn get_by_payload_type_returns_no_jobs_when_empty() {
        let store = InMemoryJobStore::new();
        let err = store
            .get_by_payload_type(&PayloadType::new("exec_flow"), "worker-1", Duration::seconds(30))
            .await
            .unwrap_err();
        assert!(err.is_no_jobs());
    }

    #[tokio::test]
    async fn get_by_payload_type_claims_oldest_ready_job() {
        let store = InMemoryJobStore::new();
        store.put(sample_job("exec_flow")).await.unwrap();
        store.put(sample_job("exec_flow")).await.unwrap();

        let claimed = store
            .get_by_payload_type(&PayloadType::new("exec_flow"), "worker-1", Duration::seconds(30))
            .await
            .unwrap();

        assert_eq!(claimed.status, JobStatus::Claimed);
        assert_eq!(claimed.lock_holder.as_deref(), Some("worker-1"));
        assert!(claimed.lock_expiry.is_some());
    }

    #[tokio::test]
    async fn scheduled_at_in_future_is_not_claimable() {
        let store = InMemoryJobStore::new();
        let job = sample_job("exec_flow").with_scheduled_at(Utc::now() + Duration::hours(1));
        store.put(job).await.unwrap();

        let err = store
            .get_by_payload_type(&PayloadType::new("exec_flow"), "worker-1", Duration::seconds(30))
            .await
            .unwrap_err();
        assert!(err.is_no_jobs());
    }

    #[tokio::test]
    async fn complete_marks_job_done() {
        let store = InMemoryJobStore::new();
        let id = store.put(sample_job("exec_flow")).await.unwrap();
        store
            .get_by_payload_type(&PayloadType::new("exec_flow"), "worker-1", Duration::seconds(30))
            .await
            .unwrap();
        store.complete(id).await.unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].status, JobStatus::Done);
        assert!(snapshot[0].lock_holder.is_none());
    }

    #[tokio::test]
    async fn complete_unknown_id_errors() {
        let store = InMemoryJobStore::new();
        let err = store.complete(JobId::new(999)).await.unwrap_err();
        assert_eq!(err, JobStoreError::NotFound { id: JobId::new(999) });
    }

    #[tokio::test]
    async fn cancel_by_exec_id_cancels_only_non_terminal_jobs() {
        let store = InMemoryJobStore::new();
        let exec_id = ExecId::new();
        let job_a = Job::new(exec_id, PayloadType::new("exec_flow"), b"{}".to_vec());
        let job_b = Job::new(exec_id, PayloadType::new("exec_flow"), b"{}".to_vec());
        let id_a = store.put(job_a).await.unwrap();
        store.put(job_b).await.unwrap();
        store
            .get_by_payload_type(&PayloadType::new("exec_flow"), "worker-1", Duration::seconds(30))
            .await
            .ok();
        store.complete(id_a).await.ok();

        let cancelled = store.cancel_by_exec_id(exec_id).await.unwrap();
        assert_eq!(cancelled, 1);
    }

    #[tokio::test]
    async fn initialize_reclaims_expired_leases() {
        let store = InMemoryJobStore::new();
        let id = store.put(sample_job("exec_flow")).await.unwrap();
        store
            .get_by_payload_type(&PayloadType::new("exec_flow"), "worker-1", Duration::seconds(-1))
            .await
            .unwrap();

        let reclaimed = store.initialize().await.unwrap();
        assert_eq!(reclaimed, 1);

        let snapshot = store.snapshot();
        let job = snapshot.iter().find(|j| j.id == id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt, 1);
    }

    #[test]
    fn should_retry_respects_max_retries() {
        let job = sample_job("exec_flow").with_max_retries(2);
        assert!(job.should_retry());
        let job = Job {
            attempt: 2,
            ..job
        };
        assert!(!job.should_retry());
    }

    #[test]
    fn backoff_grows_then_caps() {
        let initial = Duration::seconds(1);
        let max = Duration::seconds(30);
        let first = backoff(0, initial, 2.0, max);
        let second = backoff(1, initial, 2.0, max);
        let capped = backoff(10, initial, 2.0, max);
        assert!(second > first);
        assert_eq!(capped, max);
    }
}
