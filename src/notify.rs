//! Best-effort delivery of session events to the affected member.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::models::{Cid, SessionId};
use crate::time::{DATE_FORMAT, TIME_FORMAT};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook responded with status {0}")]
    Rejected(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    SessionAccepted,
    StudentCancelledSession,
    TrainerCancelledSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    /// Display name of the member who caused the event.
    pub actor: String,
    pub session_id: Option<SessionId>,
    pub date_time: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn message(&self) -> String {
        let date = self.date_time.format(DATE_FORMAT);
        let time = self.date_time.format(TIME_FORMAT);
        match self.kind {
            NotificationKind::SessionAccepted => format!(
                "{} has accepted your training session on {date} at {time}",
                self.actor
            ),
            NotificationKind::StudentCancelledSession
            | NotificationKind::TrainerCancelledSession => format!(
                "{} has cancelled the training session on {date} at {time}",
                self.actor
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: Cid, event: &NotificationEvent) -> Result<(), NotifyError>;

    fn channel_name(&self) -> &str;
}

/// Delivers `event` and logs the outcome. Failures never reach the caller.
pub async fn deliver(notifier: &dyn Notifier, recipient: Cid, event: NotificationEvent) {
    match notifier.notify(recipient, &event).await {
        Ok(()) => info!(
            recipient,
            kind = ?event.kind,
            channel = notifier.channel_name(),
            "notification delivered"
        ),
        Err(err) => warn!(
            recipient,
            kind = ?event.kind,
            channel = notifier.channel_name(),
            error = %err,
            "notification delivery failed"
        ),
    }
}

/// Writes notifications to the log only.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: Cid, event: &NotificationEvent) -> Result<(), NotifyError> {
        info!(recipient, message = %event.message(), "notification");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    recipient: Cid,
    message: String,
    #[serde(flatten)]
    event: &'a NotificationEvent,
}

/// POSTs each notification as JSON to a fixed URL; the receiver picks the
/// channel (Discord, email) from the recipient's preferences.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, recipient: Cid, event: &NotificationEvent) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            recipient,
            message: event.message(),
            event,
        };
        let response = self
            .client
            .post(self.url.as_str())
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}
