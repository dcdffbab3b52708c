//! The Weighted Scheduler: drives worker pools per payload type, retry
//! backoff, and cron synchronization via three concurrent loops.

use crate::cron::{CronEngine, CronSchedule};
use crate::error::SchedulerError;
use crate::job::{backoff, Job, JobStore, PayloadType};
use crate::registry::HandlerRegistry;
use chrono::{DateTime, Duration, Utc};
use flowctl_core::ExecId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// A cron-backed job definition held in the scheduler's in-memory cache.
#[derive(Debug, Clone)]
pub struct CronEntry {
    /// Identifies this entry for once-per-minute fire tracking.
    pub id: String,
    /// The schedule to evaluate.
    pub schedule: CronSchedule,
    /// Payload type of the job to enqueue when this entry fires.
    pub payload_type: PayloadType,
    /// Payload bytes to enqueue when this entry fires.
    pub payload: Vec<u8>,
}

/// Retry backoff parameters and per-type dispatch weights.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Weight (0-100) per payload type; MUST sum to 100 across registered types.
    pub weights: HashMap<PayloadType, u32>,
    /// Total worker slots available per task-loop tick, distributed by weight.
    pub worker_budget: u32,
    /// Initial retry delay.
    pub initial_delay: Duration,
    /// Multiplicative backoff factor per retry attempt.
    pub backoff_factor: f64,
    /// Maximum retry delay.
    pub max_delay: Duration,
    /// Task-loop tick period.
    pub task_loop_period: std::time::Duration,
    /// Periodic (cron-fire-check) loop tick period.
    pub periodic_loop_period: std::time::Duration,
    /// Cron-sync (cache refresh) loop tick period.
    pub cron_sync_period: std::time::Duration,
}

impl QueueConfig {
    /// Defaults matching the reference backoff policy (15 s, 2.0x, capped at 5 min).
    #[must_use]
    pub fn new(weights: HashMap<PayloadType, u32>, worker_budget: u32) -> Self {
        Self {
            weights,
            worker_budget,
            initial_delay: Duration::seconds(15),
            backoff_factor: 2.0,
            max_delay: Duration::minutes(5),
            task_loop_period: std::time::Duration::from_secs(2),
            periodic_loop_period: std::time::Duration::from_secs(60),
            cron_sync_period: std::time::Duration::from_secs(5 * 60),
        }
    }

    /// Validates that weights sum to exactly 100.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let sum: u32 = self.weights.values().sum();
        if sum != 100 {
            return Err(SchedulerError::InvalidWeights { sum });
        }
        Ok(())
    }

    /// Task slots assigned to `payload_type` for one task-loop tick:
    /// `max(1, floor(worker_budget * weight / 100))` when `weight > 0`, else 0.
    #[must_use]
    pub fn slots_for(&self, payload_type: &PayloadType) -> u32 {
        match self.weights.get(payload_type) {
            None | Some(0) => 0,
            Some(weight) => ((self.worker_budget * weight) / 100).max(1),
        }
    }
}

/// Drives job claiming, dispatch, retry, and cron-to-job translation.
pub struct Scheduler {
    job_store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    config: QueueConfig,
    cron_engine: Arc<CronEngine>,
    cron_cache: RwLock<Vec<CronEntry>>,
    cancellations: Mutex<HashMap<ExecId, CancellationToken>>,
}

impl Scheduler {
    /// Builds a scheduler. Fails if `config`'s weights do not sum to 100.
    pub fn new(
        job_store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        config: QueueConfig,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            job_store,
            registry,
            config,
            cron_engine: Arc::new(CronEngine::new()),
            cron_cache: RwLock::new(Vec::new()),
            cancellations: Mutex::new(HashMap::new()),
        })
    }

    /// Replaces the cron cache wholesale; called by the cron-sync loop.
    pub fn set_cron_cache(&self, entries: Vec<CronEntry>) {
        *self.cron_cache.write().expect("lock poisoned") = entries;
    }

    /// Enqueues a job visible no earlier than `scheduled_at`, which must be
    /// strictly in the future.
    pub async fn queue_scheduled_task(
        &self,
        exec_id: ExecId,
        payload_type: PayloadType,
        payload: Vec<u8>,
        scheduled_at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        if scheduled_at <= Utc::now() {
            return Err(SchedulerError::JobStoreOperation {
                exec_id: Some(exec_id),
            });
        }
        let job = Job::new(exec_id, payload_type, payload).with_scheduled_at(scheduled_at);
        self.job_store
            .put(job)
            .await
            .map_err(|_| SchedulerError::JobStoreOperation {
                exec_id: Some(exec_id),
            })?;
        Ok(())
    }

    /// Enqueues a job visible immediately.
    pub async fn queue_task(
        &self,
        exec_id: ExecId,
        payload_type: PayloadType,
        payload: Vec<u8>,
    ) -> Result<(), SchedulerError> {
        let job = Job::new(exec_id, payload_type, payload);
        self.job_store
            .put(job)
            .await
            .map_err(|_| SchedulerError::JobStoreOperation {
                exec_id: Some(exec_id),
            })?;
        Ok(())
    }

    /// Triggers the cancellation token registered for `exec_id`, if any, and
    /// marks every non-terminal job with that exec-ID cancelled.
    #[instrument(skip(self))]
    pub async fn cancel_task(&self, exec_id: ExecId) -> Result<(), SchedulerError> {
        if let Some(token) = self.cancellations.lock().expect("lock poisoned").get(&exec_id) {
            token.cancel();
        }
        self.job_store
            .cancel_by_exec_id(exec_id)
            .await
            .map_err(|_| SchedulerError::JobStoreOperation {
                exec_id: Some(exec_id),
            })?;
        Ok(())
    }

    /// Returns the cancellation token registered for `exec_id`, if present.
    #[must_use]
    pub fn cancellation_for(&self, exec_id: ExecId) -> Option<CancellationToken> {
        self.cancellations.lock().expect("lock poisoned").get(&exec_id).cloned()
    }

    /// Claims and processes up to `slots_for(payload_type)` jobs of one type.
    ///
    /// Returns the number of jobs claimed (including ones that immediately
    /// failed and were re-enqueued for retry).
    #[instrument(skip(self), fields(payload_type = %payload_type))]
    pub async fn run_task_loop_tick(&self, payload_type: &PayloadType, worker_id: &str) -> u32 {
        let slots = self.config.slots_for(payload_type);
        let mut claimed = 0;
        for _ in 0..slots {
            match self
                .job_store
                .get_by_payload_type(payload_type, worker_id, Duration::minutes(10))
                .await
            {
                Ok(job) => {
                    claimed += 1;
                    self.execute_claimed_job(job).await;
                }
                Err(e) if e.is_no_jobs() => break,
                Err(e) => {
                    warn!(error = %e, "job store claim failed");
                    break;
                }
            }
        }
        claimed
    }

    async fn execute_claimed_job(&self, job: Job) {
        let token = CancellationToken::new();
        self.cancellations
            .lock()
            .expect("lock poisoned")
            .insert(job.exec_id, token.clone());

        let result = self.registry.dispatch(&job, token.clone()).await;

        match result {
            Ok(()) => {
                if let Err(e) = self.job_store.complete(job.id).await {
                    warn!(error = %e, job_id = %job.id, "failed to mark job complete");
                }
            }
            Err(e) if !e.is_retriable_kind() => {
                info!(job_id = %job.id, reason = %e, "job finished without retry (approval/cancellation)");
                let _ = self.job_store.complete(job.id).await;
            }
            Err(e) => {
                let retried = job.clone();
                if retried.should_retry() {
                    let delay = backoff(
                        retried.attempt,
                        self.config.initial_delay,
                        self.config.backoff_factor,
                        self.config.max_delay,
                    );
                    let mut next_job = retried;
                    next_job.attempt += 1;
                    next_job.scheduled_at = Utc::now() + delay;
                    if let Err(put_err) = self.job_store.put(next_job).await {
                        warn!(error = %put_err, "failed to enqueue retry");
                    }
                } else {
                    warn!(job_id = %job.id, reason = %e, "job exhausted retries");
                }
                let _ = self.job_store.complete(job.id).await;
            }
        }

        self.cancellations.lock().expect("lock poisoned").remove(&job.exec_id);
    }

    /// Runs one periodic-loop tick: evaluates every cached cron entry against
    /// `now` and enqueues an immediate job for each one that fires.
    #[instrument(skip(self, now))]
    pub async fn run_periodic_loop_tick(&self, now: DateTime<Utc>) -> Vec<ExecId> {
        let entries = self.cron_cache.read().expect("lock poisoned").clone();
        let mut fired = Vec::new();
        for entry in entries {
            let due = match self.cron_engine.poll(&entry.id, &entry.schedule, now) {
                Ok(due) => due,
                Err(e) => {
                    warn!(cron_id = %entry.id, error = %e, "cron entry invalid, skipping");
                    continue;
                }
            };
            if due {
                let exec_id = ExecId::new();
                if self
                    .queue_task(exec_id, entry.payload_type.clone(), entry.payload.clone())
                    .await
                    .is_ok()
                {
                    fired.push(exec_id);
                }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::job::InMemoryJobStore;
    use crate::registry::Handler;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn weights(pairs: &[(&str, u32)]) -> HashMap<PayloadType, u32> {
        pairs
            .iter()
            .map(|(t, w)| (PayloadType::new(*t), *w))
            .collect()
    }

    #[test]
    fn validate_rejects_weights_not_summing_to_100() {
        let config = QueueConfig::new(weights(&[("exec_flow", 50)]), 10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_weights_summing_to_100() {
        let config = QueueConfig::new(weights(&[("exec_flow", 70), ("notify", 30)]), 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn slots_for_floors_and_guarantees_at_least_one() {
        let config = QueueConfig::new(weights(&[("exec_flow", 70), ("notify", 30)]), 10);
        assert_eq!(config.slots_for(&PayloadType::new("exec_flow")), 7);
        assert_eq!(config.slots_for(&PayloadType::new("notify")), 3);
        assert_eq!(config.slots_for(&PayloadType::new("unknown")), 0);
    }

    #[test]
    fn slots_for_guarantees_minimum_one_slot_for_small_weight() {
        let config = QueueConfig::new(weights(&[("exec_flow", 1), ("notify", 99)]), 10);
        assert_eq!(config.slots_for(&PayloadType::new("exec_flow")), 1);
    }

    struct AlwaysFail;

    #[async_trait]
    impl Handler for AlwaysFail {
        fn payload_type(&self) -> PayloadType {
            PayloadType::new("exec_flow")
        }

        async fn handle(&self, _job: &Job, _cancellation: CancellationToken) -> Result<(), HandlerError> {
            Err(HandlerError::Failed {
                reason: "boom".into(),
            })
        }
    }

    struct CountingSucceed(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler for CountingSucceed {
        fn payload_type(&self) -> PayloadType {
            PayloadType::new("exec_flow")
        }

        async fn handle(&self, _job: &Job, _cancellation: CancellationToken) -> Result<(), HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn task_loop_tick_dispatches_up_to_its_slot_count() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let registry = Arc::new(HandlerRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(Box::new(CountingSucceed(calls.clone())));

        for _ in 0..5 {
            store
                .put(Job::new(ExecId::new(), PayloadType::new("exec_flow"), b"{}".to_vec()))
                .await
                .unwrap();
        }

        let config = QueueConfig::new(weights(&[("exec_flow", 100)]), 3);
        let scheduler = Scheduler::new(store, registry, config).unwrap();

        let claimed = scheduler
            .run_task_loop_tick(&PayloadType::new("exec_flow"), "worker-1")
            .await;
        assert_eq!(claimed, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_job_is_reenqueued_with_incremented_attempt() {
        let store = Arc::new(InMemoryJobStore::new());
        let store_dyn: Arc<dyn JobStore> = store.clone();
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(Box::new(AlwaysFail));

        let job = Job::new(ExecId::new(), PayloadType::new("exec_flow"), b"{}".to_vec())
            .with_max_retries(3);
        store_dyn.put(job).await.unwrap();

        let config = QueueConfig::new(weights(&[("exec_flow", 100)]), 1);
        let scheduler = Scheduler::new(store_dyn, registry, config).unwrap();
        scheduler
            .run_task_loop_tick(&PayloadType::new("exec_flow"), "worker-1")
            .await;

        let snapshot = store.snapshot();
        let retried = snapshot
            .iter()
            .find(|j| j.attempt == 1)
            .expect("expected a retried job");
        assert!(retried.scheduled_at > Utc::now());
    }

    #[tokio::test]
    async fn cancel_task_triggers_registered_token() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let registry = Arc::new(HandlerRegistry::new());
        let config = QueueConfig::new(weights(&[("exec_flow", 100)]), 1);
        let scheduler = Scheduler::new(store, registry, config).unwrap();

        let exec_id = ExecId::new();
        let token = CancellationToken::new();
        scheduler
            .cancellations
            .lock()
            .unwrap()
            .insert(exec_id, token.clone());

        scheduler.cancel_task(exec_id).await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn periodic_loop_tick_enqueues_due_cron_entries() {
        let store = Arc::new(InMemoryJobStore::new());
        let store_dyn: Arc<dyn JobStore> = store.clone();
        let registry = Arc::new(HandlerRegistry::new());
        let config = QueueConfig::new(weights(&[("exec_flow", 100)]), 1);
        let scheduler = Scheduler::new(store_dyn, registry, config).unwrap();

        scheduler.set_cron_cache(vec![CronEntry {
            id: "nightly".into(),
            schedule: CronSchedule::new("0 7 * * *"),
            payload_type: PayloadType::new("exec_flow"),
            payload: b"{}".to_vec(),
        }]);

        let now = chrono::Utc
            .with_ymd_and_hms(2026, 1, 1, 7, 0, 10)
            .unwrap();
        let fired = scheduler.run_periodic_loop_tick(now).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(store.snapshot().len(), 1);
    }
}
