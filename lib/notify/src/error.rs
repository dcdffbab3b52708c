//! Error types for template rendering and message delivery.

use std::fmt;

/// Errors from the `Messenger` seam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessengerError {
    Unavailable { channel: String, reason: String },
    InvalidRecipient { recipient: String },
}

impl fmt::Display for MessengerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { channel, reason } => {
                write!(f, "channel '{channel}' unavailable: {reason}")
            }
            Self::InvalidRecipient { recipient } => {
                write!(f, "invalid recipient '{recipient}'")
            }
        }
    }
}

impl std::error::Error for MessengerError {}

/// Errors from the Notification Handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    Render { reason: String },
    Deliver { reason: String },
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render { reason } => write!(f, "template render failed: {reason}"),
            Self::Deliver { reason } => write!(f, "delivery failed: {reason}"),
        }
    }
}

impl std::error::Error for NotifyError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_display() {
        let err = MessengerError::Unavailable {
            channel: "slack".into(),
            reason: "webhook timed out".into(),
        };
        assert!(err.to_string().contains("slack"));
    }
}
