//! The Notification Handler: consumes status-change jobs, expands `group:<name>`
//! receivers via the `GroupMembership` seam, and delivers a rendered message
//! through the `Messenger` seam.

pub mod error;
pub mod handler;
pub mod messenger;
pub mod templates;

pub use error::{MessengerError, NotifyError};
pub use handler::{NotificationHandler, NotificationPayload};
pub use messenger::{InMemoryMessenger, Messenger, SentMessage, WebhookMessenger};
pub use templates::{NotificationContext, TemplateSet};
