//! The `Messenger` seam: delivers a rendered message to one recipient over
//! one channel. Concrete implementations (Slack webhook, SMTP, ...) live
//! outside this crate; errors propagate so the scheduler can retry per the
//! job's retry policy.

use crate::error::MessengerError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(
        &self,
        channel: &str,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), MessengerError>;
}

/// One delivered message, recorded for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// In-memory `Messenger` for tests: records every send, never fails unless
/// the channel is in `unavailable_channels`.
#[derive(Default)]
pub struct InMemoryMessenger {
    sent: Mutex<Vec<SentMessage>>,
    unavailable_channels: HashMap<String, String>,
}

impl InMemoryMessenger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(channel: &str, reason: &str) -> Self {
        let mut unavailable_channels = HashMap::new();
        unavailable_channels.insert(channel.to_string(), reason.to_string());
        Self {
            sent: Mutex::new(Vec::new()),
            unavailable_channels,
        }
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl Messenger for InMemoryMessenger {
    async fn send(
        &self,
        channel: &str,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), MessengerError> {
        if let Some(reason) = self.unavailable_channels.get(channel) {
            return Err(MessengerError::Unavailable {
                channel: channel.to_string(),
                reason: reason.clone(),
            });
        }
        self.sent.lock().expect("lock poisoned").push(SentMessage {
            channel: channel.to_string(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// `Messenger` that posts to a per-channel webhook URL (Slack incoming
/// webhooks, a generic notification gateway, ...).
///
/// Channels with no configured URL fail with `MessengerError::Unavailable`
/// rather than silently dropping the message.
pub struct WebhookMessenger {
    client: reqwest::Client,
    webhooks: HashMap<String, String>,
}

impl WebhookMessenger {
    #[must_use]
    pub fn new(webhooks: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhooks,
        }
    }
}

#[async_trait]
impl Messenger for WebhookMessenger {
    async fn send(&self, channel: &str, recipient: &str, subject: &str, body: &str) -> Result<(), MessengerError> {
        let url = self.webhooks.get(channel).ok_or_else(|| MessengerError::Unavailable {
            channel: channel.to_string(),
            reason: "no webhook URL configured for this channel".into(),
        })?;

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "recipient": recipient,
                "subject": subject,
                "body": body,
            }))
            .send()
            .await
            .map_err(|e| MessengerError::Unavailable {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(MessengerError::Unavailable {
                channel: channel.to_string(),
                reason: format!("webhook responded with status {}", response.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_records_the_message() {
        let messenger = InMemoryMessenger::new();
        messenger.send("slack", "#oncall", "subject", "body").await.unwrap();
        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "#oncall");
    }

    #[tokio::test]
    async fn send_on_unavailable_channel_fails() {
        let messenger = InMemoryMessenger::failing("slack", "webhook timed out");
        let err = messenger.send("slack", "#oncall", "s", "b").await.unwrap_err();
        assert!(matches!(err, MessengerError::Unavailable { .. }));
    }
}
