//! Error types for the queue crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `JobStoreError`: errors from job queue storage
//! - `HandlerError`: errors returned by a payload handler
//! - `CronError`: errors from cron expression parsing/evaluation
//! - `SchedulerError`: high-level wrapper for context

use flowctl_core::{ExecId, JobId};
use std::fmt;

/// Errors from job store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStoreError {
    /// No ready job of the requested payload type.
    NoJobs,
    /// Job not found.
    NotFound { id: JobId },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for JobStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoJobs => write!(f, "no ready jobs"),
            Self::NotFound { id } => write!(f, "job not found: {id}"),
            Self::StorageFailed { reason } => write!(f, "job store operation failed: {reason}"),
        }
    }
}

impl std::error::Error for JobStoreError {}

impl JobStoreError {
    /// True iff this is the `NoJobs` sentinel, distinguishable by callers
    /// the way the source's `ErrNoJobs` is.
    #[must_use]
    pub fn is_no_jobs(&self) -> bool {
        matches!(self, Self::NoJobs)
    }
}

/// Errors returned by a registered handler while processing a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler encountered the approval-pending sentinel; the scheduler
    /// must NOT retry this job.
    PendingApproval,
    /// The handler observed cancellation; the scheduler must NOT retry this job.
    ExecutionCancelled,
    /// A generic, retriable failure.
    Failed { reason: String },
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingApproval => write!(f, "execution is pending approval"),
            Self::ExecutionCancelled => write!(f, "execution was cancelled"),
            Self::Failed { reason } => write!(f, "handler failed: {reason}"),
        }
    }
}

impl std::error::Error for HandlerError {}

impl HandlerError {
    /// Whether the scheduler's retry machinery should act on this error.
    ///
    /// `PendingApproval` and `ExecutionCancelled` are terminal-for-retry
    /// sentinels distinguished from an ordinary retriable failure (spec §7).
    #[must_use]
    pub fn is_retriable_kind(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Errors from cron parsing/evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    /// The cron expression could not be parsed.
    InvalidExpression { expression: String, reason: String },
    /// The declared timezone name is not a recognized IANA timezone.
    InvalidTimezone { timezone: String },
}

impl fmt::Display for CronError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::InvalidTimezone { timezone } => write!(f, "invalid timezone: {timezone}"),
        }
    }
}

impl std::error::Error for CronError {}

/// High-level scheduler errors.
///
/// Use these to add context when wrapping lower-level errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Queue config weights did not sum to 100.
    InvalidWeights { sum: u32 },
    /// A payload type was dispatched with no registered handler.
    UnregisteredPayloadType { payload_type: String },
    /// Job store operation context (use as context wrapper).
    JobStoreOperation { exec_id: Option<ExecId> },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWeights { sum } => {
                write!(f, "queue config weights must sum to 100, got {sum}")
            }
            Self::UnregisteredPayloadType { payload_type } => {
                write!(f, "no handler registered for payload type '{payload_type}'")
            }
            Self::JobStoreOperation { exec_id } => match exec_id {
                Some(id) => write!(f, "job store operation failed for execution {id}"),
                None => write!(f, "job store operation failed"),
            },
        }
    }
}

impl std::error::Error for SchedulerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_store_error_no_jobs_sentinel() {
        assert!(JobStoreError::NoJobs.is_no_jobs());
        assert!(!JobStoreError::NotFound { id: JobId::new(1) }.is_no_jobs());
    }

    #[test]
    fn handler_error_retriable_kind() {
        assert!(!HandlerError::PendingApproval.is_retriable_kind());
        assert!(!HandlerError::ExecutionCancelled.is_retriable_kind());
        assert!(
            HandlerError::Failed {
                reason: "boom".into()
            }
            .is_retriable_kind()
        );
    }

    #[test]
    fn scheduler_error_display() {
        let err = SchedulerError::InvalidWeights { sum: 90 };
        assert!(err.to_string().contains("90"));
    }
}
