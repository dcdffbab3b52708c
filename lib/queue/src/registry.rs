//! The Handler Registry: maps a payload type to the handler that processes it.

use crate::error::HandlerError;
use crate::job::{Job, PayloadType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Processes jobs of a single payload type.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The payload type this handler processes.
    fn payload_type(&self) -> PayloadType;

    /// Processes one job.
    ///
    /// `cancellation` is the scheduler's token for this job's exec-ID; it is
    /// cancelled by `Scheduler::cancel_task` and MUST be observed by any
    /// long-running work the handler performs, not just polled between steps.
    ///
    /// Returning `HandlerError::PendingApproval` or `HandlerError::ExecutionCancelled`
    /// tells the scheduler not to retry; any other error follows the retry/backoff
    /// policy up to the job's `max_retries`.
    async fn handle(&self, job: &Job, cancellation: CancellationToken) -> Result<(), HandlerError>;
}

/// Registers handlers by payload type and dispatches jobs to them.
///
/// Registration is idempotent by payload type: registering a second handler
/// for an already-registered type replaces the first.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<PayloadType, Box<dyn Handler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for its declared payload type.
    pub fn register(&self, handler: Box<dyn Handler>) {
        let payload_type = handler.payload_type();
        self.handlers
            .write()
            .expect("lock poisoned")
            .insert(payload_type, handler);
    }

    /// Whether a handler is registered for `payload_type`.
    #[must_use]
    pub fn is_registered(&self, payload_type: &PayloadType) -> bool {
        self.handlers.read().expect("lock poisoned").contains_key(payload_type)
    }

    /// Every payload type currently registered.
    #[must_use]
    pub fn registered_types(&self) -> Vec<PayloadType> {
        self.handlers.read().expect("lock poisoned").keys().cloned().collect()
    }

    /// Dispatches a job to its handler.
    ///
    /// Returns `HandlerError::Failed` (a retriable kind) if no handler is
    /// registered for the job's payload type, since that is a configuration
    /// problem the scheduler should surface through the normal retry path
    /// rather than silently drop the job.
    pub async fn dispatch(&self, job: &Job, cancellation: CancellationToken) -> Result<(), HandlerError> {
        let handler = {
            let handlers = self.handlers.read().expect("lock poisoned");
            handlers.get(&job.payload_type).map(|_| ())
        };
        if handler.is_none() {
            return Err(HandlerError::Failed {
                reason: format!("no handler registered for payload type '{}'", job.payload_type),
            });
        }
        // Re-acquire outside the short-lived read guard above so the handler's
        // own `handle` call, which may itself need the registry, can't deadlock.
        let handlers = self.handlers.read().expect("lock poisoned");
        let handler = handlers.get(&job.payload_type).expect("checked above");
        handler.handle(job, cancellation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowctl_core::ExecId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        payload_type: PayloadType,
        calls: Arc<AtomicUsize>,
        result: Result<(), HandlerError>,
    }

    #[async_trait]
    impl Handler for CountingHandler {
        fn payload_type(&self) -> PayloadType {
            self.payload_type.clone()
        }

        async fn handle(&self, _job: &Job, _cancellation: CancellationToken) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn sample_job(payload_type: &str) -> Job {
        Job::new(ExecId::new(), PayloadType::new(payload_type), b"{}".to_vec())
    }

    #[tokio::test]
    async fn dispatch_routes_to_matching_handler() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(Box::new(CountingHandler {
            payload_type: PayloadType::new("exec_flow"),
            calls: calls.clone(),
            result: Ok(()),
        }));

        registry
            .dispatch(&sample_job("exec_flow"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_with_no_registered_handler_fails() {
        let registry = HandlerRegistry::new();
        let err = registry
            .dispatch(&sample_job("exec_flow"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retriable_kind());
    }

    #[test]
    fn register_replaces_existing_handler_for_same_type() {
        let registry = HandlerRegistry::new();
        registry.register(Box::new(CountingHandler {
            payload_type: PayloadType::new("exec_flow"),
            calls: Arc::new(AtomicUsize::new(0)),
            result: Ok(()),
        }));
        registry.register(Box::new(CountingHandler {
            payload_type: PayloadType::new("exec_flow"),
            calls: Arc::new(AtomicUsize::new(0)),
            result: Err(HandlerError::Failed { reason: "replaced".into() }),
        }));

        assert_eq!(registry.registered_types().len(), 1);
    }
}
