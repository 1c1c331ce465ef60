//! Outbound delivery collaborators: email transport and messenger broadcast.

mod mailgun;
mod messenger;

pub use mailgun::MailgunTransport;
pub use messenger::HttpMessenger;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{workflow::Attachment, Result};

/// A fully composed email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub tracking_enabled: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Outcome of delivering a broadcast to one messenger user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub recipient_id: String,
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn delivered(recipient_id: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            error: None,
        }
    }

    pub fn failed(recipient_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fails with `Error::Transport` when the provider rejects the message.
    async fn send_email(&self, message: OutboundEmail) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver `message` to every subscribed user.
    ///
    /// Per-recipient failures are reported in the returned list; only a
    /// failure to reach the backend at all is an `Error::Broadcast`.
    async fn broadcast(&self, message: &str) -> Result<Vec<DeliveryReport>>;
}
