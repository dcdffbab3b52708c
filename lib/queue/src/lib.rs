//! Job queueing and scheduling for the flowctl execution engine.
//!
//! This crate provides:
//!
//! - **Job Store**: a durable, lease-based FIFO queue (`job`)
//! - **Handler Registry**: payload-type-to-handler dispatch (`registry`)
//! - **Cron Engine**: cron expression parsing and once-per-minute firing (`cron`)
//! - **Weighted Scheduler**: worker-pool loops, retry backoff, cancellation (`scheduler`)

pub mod cron;
pub mod error;
pub mod job;
pub mod postgres;
pub mod registry;
pub mod scheduler;

pub use cron::{CronEngine, CronSchedule};
pub use error::{CronError, HandlerError, JobStoreError, SchedulerError};
pub use job::{backoff, InMemoryJobStore, Job, JobStatus, JobStore, PayloadType};
pub use postgres::PgJobStore;
pub use registry::{Handler, HandlerRegistry};
pub use scheduler::{CronEntry, QueueConfig, Scheduler};
