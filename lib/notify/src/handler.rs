//! The Notification Handler: consumes status-change jobs, expands receivers,
//! renders a status-dependent message, and hands it to the `Messenger` seam.

use crate::error::NotifyError;
use crate::messenger::Messenger;
use crate::templates::{NotificationContext, TemplateSet};
use async_trait::async_trait;
use flowctl_authz::GroupMembership;
use flowctl_core::{ExecId, NamespaceId};
use flowctl_queue::error::HandlerError;
use flowctl_queue::job::{Job, PayloadType};
use flowctl_queue::registry::Handler;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// Queue-visible payload routed to this handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub flow_id: String,
    pub flow_name: String,
    pub exec_id: ExecId,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    pub receivers: Vec<String>,
    pub namespace_id: NamespaceId,
    /// Messenger channel identifier, e.g. `"slack"`, `"email"`. Empty means
    /// no channel was bound; `handle` warns and no-ops rather than failing.
    pub channel: String,
}

/// Collaborators wired in by the composition root.
pub struct NotificationHandler {
    pub messenger: Arc<dyn Messenger>,
    pub group_membership: Arc<dyn GroupMembership>,
    pub templates: TemplateSet,
}

impl NotificationHandler {
    #[must_use]
    pub fn new(messenger: Arc<dyn Messenger>, group_membership: Arc<dyn GroupMembership>) -> Self {
        Self {
            messenger,
            group_membership,
            templates: TemplateSet::new(),
        }
    }

    fn payload_type_tag() -> PayloadType {
        PayloadType::new("notification")
    }

    /// Expands `group:<name>` receivers via `GroupMembership::members_of`;
    /// anything else is a literal recipient.
    async fn resolve_recipients(&self, receivers: &[String]) -> Vec<String> {
        let mut recipients = Vec::new();
        for receiver in receivers {
            match receiver.strip_prefix("group:") {
                Some(group_name) => match self.group_membership.members_of(group_name).await {
                    Ok(members) => recipients.extend(members),
                    Err(e) => warn!(group = group_name, error = %e, "failed to expand group receiver"),
                },
                None => recipients.push(receiver.clone()),
            }
        }
        recipients
    }

    async fn notify(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        if payload.channel.is_empty() {
            warn!(exec_id = %payload.exec_id, "notification has no channel bound, skipping");
            return Ok(());
        }

        let recipients = self.resolve_recipients(&payload.receivers).await;
        if recipients.is_empty() {
            return Ok(());
        }

        let exec_id = payload.exec_id.to_string();
        let ctx = NotificationContext {
            flow_id: &payload.flow_id,
            flow_name: &payload.flow_name,
            exec_id: &exec_id,
            status: &payload.status,
            error: payload.error.as_deref(),
        };
        let (subject, body) = self.templates.render(&ctx)?;

        for recipient in recipients {
            self.messenger
                .send(&payload.channel, &recipient, &subject, &body)
                .await
                .map_err(|e| NotifyError::Deliver { reason: e.to_string() })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for NotificationHandler {
    fn payload_type(&self) -> PayloadType {
        Self::payload_type_tag()
    }

    #[instrument(skip(self, job, _cancellation), fields(exec_id = %job.exec_id))]
    async fn handle(&self, job: &Job, _cancellation: CancellationToken) -> Result<(), HandlerError> {
        let payload: NotificationPayload =
            serde_json::from_slice(&job.payload).map_err(|e| HandlerError::Failed {
                reason: format!("invalid notification payload: {e}"),
            })?;

        self.notify(&payload).await.map_err(|e| HandlerError::Failed {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::InMemoryMessenger;
    use flowctl_authz::InMemoryGroupMembership;

    fn sample_payload(channel: &str, receivers: Vec<String>) -> NotificationPayload {
        NotificationPayload {
            flow_id: "deploy".into(),
            flow_name: "Deploy".into(),
            exec_id: ExecId::new(),
            status: "completed".into(),
            error: None,
            receivers,
            namespace_id: NamespaceId::new(),
            channel: channel.to_string(),
        }
    }

    fn job_for(payload: &NotificationPayload) -> Job {
        Job::new(
            payload.exec_id,
            PayloadType::new("notification"),
            serde_json::to_vec(payload).unwrap(),
        )
    }

    #[tokio::test]
    async fn handle_delivers_to_a_literal_recipient() {
        let messenger = Arc::new(InMemoryMessenger::new());
        let handler = NotificationHandler::new(messenger.clone(), Arc::new(InMemoryGroupMembership::new()));
        let payload = sample_payload("slack", vec!["alice@example.com".into()]);
        handler.handle(&job_for(&payload), CancellationToken::new()).await.unwrap();

        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "alice@example.com");
        assert_eq!(sent[0].subject, "[Deploy] completed");
    }

    #[tokio::test]
    async fn handle_expands_a_group_receiver() {
        let membership = Arc::new(InMemoryGroupMembership::new());
        membership.add_member("oncall", "bob").await;
        membership.add_member("oncall", "carol").await;
        let messenger = Arc::new(InMemoryMessenger::new());
        let handler = NotificationHandler::new(messenger.clone(), membership);
        let payload = sample_payload("slack", vec!["group:oncall".into()]);
        handler.handle(&job_for(&payload), CancellationToken::new()).await.unwrap();

        let sent = messenger.sent();
        assert_eq!(sent.len(), 2);
    }

    #[tokio::test]
    async fn handle_with_no_channel_is_a_noop() {
        let messenger = Arc::new(InMemoryMessenger::new());
        let handler = NotificationHandler::new(messenger.clone(), Arc::new(InMemoryGroupMembership::new()));
        let payload = sample_payload("", vec!["alice@example.com".into()]);
        handler.handle(&job_for(&payload), CancellationToken::new()).await.unwrap();

        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn handle_with_empty_receivers_is_a_noop() {
        let messenger = Arc::new(InMemoryMessenger::new());
        let handler = NotificationHandler::new(messenger.clone(), Arc::new(InMemoryGroupMembership::new()));
        let payload = sample_payload("slack", vec![]);
        handler.handle(&job_for(&payload), CancellationToken::new()).await.unwrap();

        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn handle_surfaces_messenger_failure_for_retry() {
        let messenger = Arc::new(InMemoryMessenger::failing("slack", "webhook timed out"));
        let handler = NotificationHandler::new(messenger, Arc::new(InMemoryGroupMembership::new()));
        let payload = sample_payload("slack", vec!["alice@example.com".into()]);
        let err = handler.handle(&job_for(&payload), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, HandlerError::Failed { .. }));
    }
}
