//! Per-execution multiplexed log channel with checkpoints.
//!
//! Durable enough to survive a short subscriber reconnect (a bounded ring
//! buffer), not required to be replayable from the beginning.

use crate::envelope::Envelope;
use chrono::{DateTime, Utc};
use flowctl_core::{ActionId, ExecId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;

/// Default ring buffer depth per execution's log channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

const SUBSCRIBE_POLL_INTERVAL: StdDuration = StdDuration::from_millis(200);
const SUBSCRIBE_GIVE_UP_AFTER: StdDuration = StdDuration::from_secs(30);

/// Closed set of message kinds a log stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Log,
    Result,
    Error,
    Cancelled,
    Approval,
}

/// One message on an execution's log stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub mtype: MessageType,
    pub action_id: ActionId,
    /// Target node name; empty string for local execution, as elsewhere.
    pub node_id: String,
    pub val: String,
    pub timestamp: DateTime<Utc>,
}

impl StreamMessage {
    #[must_use]
    pub fn new(
        mtype: MessageType,
        action_id: ActionId,
        node_id: impl Into<String>,
        val: impl Into<String>,
    ) -> Self {
        Self {
            mtype,
            action_id,
            node_id: node_id.into(),
            val: val.into(),
            timestamp: Utc::now(),
        }
    }

    /// Wraps this message for persistence.
    #[must_use]
    pub fn into_envelope(self) -> Envelope<Self> {
        Envelope::new(self)
    }
}

/// A handle bound to one execution, used by the flow execution handler to
/// emit checkpoints without re-threading the exec ID through every call.
#[derive(Clone)]
pub struct ExecLogger {
    exec_id: ExecId,
    sender: broadcast::Sender<StreamMessage>,
}

impl ExecLogger {
    /// Publishes a checkpoint. Best-effort: if there are no subscribers,
    /// `tokio::sync::broadcast` silently drops the send, which is fine since
    /// the stream has no replay-from-beginning requirement.
    pub fn checkpoint(
        &self,
        action_id: ActionId,
        node_id: impl Into<String>,
        val: impl Into<String>,
        mtype: MessageType,
    ) {
        let _ = self
            .sender
            .send(StreamMessage::new(mtype, action_id, node_id, val));
    }

    #[must_use]
    pub fn exec_id(&self) -> ExecId {
        self.exec_id
    }
}

/// Manages one broadcast channel per in-flight execution.
pub struct LogStreamManager {
    channels: RwLock<HashMap<ExecId, broadcast::Sender<StreamMessage>>>,
    capacity: usize,
}

impl LogStreamManager {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Opens (or reopens) the channel for `exec_id` and returns a logger
    /// handle bound to it.
    pub fn new_logger(&self, exec_id: ExecId) -> ExecLogger {
        let sender = {
            let mut channels = self.channels.write().expect("lock poisoned");
            channels
                .entry(exec_id)
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .clone()
        };
        ExecLogger { exec_id, sender }
    }

    /// Tears down the channel for `exec_id`. Existing receivers observe the
    /// channel close once their buffered messages are drained.
    pub fn close(&self, exec_id: ExecId) {
        self.channels.write().expect("lock poisoned").remove(&exec_id);
    }

    /// Subscribes to an already-open channel, or `None` if `exec_id` has no
    /// active logger.
    #[must_use]
    pub fn stream_logs(&self, exec_id: ExecId) -> Option<broadcast::Receiver<StreamMessage>> {
        self.channels
            .read()
            .expect("lock poisoned")
            .get(&exec_id)
            .map(broadcast::Sender::subscribe)
    }

    /// Whether a logger currently exists for `exec_id`.
    #[must_use]
    pub fn logger_exists(&self, exec_id: ExecId) -> bool {
        self.channels.read().expect("lock poisoned").contains_key(&exec_id)
    }

    /// Polls for a logger to appear, for a subscriber that races the
    /// handler's startup. Polls every 200ms, gives up after 30s.
    pub async fn wait_for_logger(&self, exec_id: ExecId) -> Option<broadcast::Receiver<StreamMessage>> {
        let deadline = tokio::time::Instant::now() + SUBSCRIBE_GIVE_UP_AFTER;
        loop {
            if let Some(rx) = self.stream_logs(exec_id) {
                return Some(rx);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(SUBSCRIBE_POLL_INTERVAL).await;
        }
    }
}

impl Default for LogStreamManager {
    fn default() -> Self {
        Self::new()
    }
}
