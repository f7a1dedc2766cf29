//! Fan-out of an alert to the organization's recipients.
//!
//! Each recipient is handled independently: an idempotence check against the
//! notification ledger, template rendering, a bounded send with a single retry on
//! transient failures, then an audit record. One recipient never affects another.

use crate::config::NotificationConfig;
use crate::db::models::{Alert, Camera, ChannelKind, NewNotification, Notification, NotificationStatus, Recipient, Sequence};
use crate::error::Error;
use crate::messaging::SequenceEvents;
use crate::services::channels::{classify_failure, classify_status, ChannelSender, Channels, Message};
use crate::services::templates::TemplateContext;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Delivery history used for idempotence and audit
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// Whether a `sent` record exists for the pair since `since`
    async fn delivered_since(&self, sequence_id: Uuid, recipient_id: Uuid, since: DateTime<Utc>) -> Result<bool>;

    async fn record(&self, notification: NewNotification) -> Result<Notification>;
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientFailure {
    pub recipient_id: Uuid,
    pub channel: ChannelKind,
    pub error: String,
    pub permanent: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub delivered: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
    pub failed: Vec<RecipientFailure>,
}

enum RecipientOutcome {
    Delivered(Uuid),
    Skipped(Uuid),
    Failed(RecipientFailure),
}

/// Result of the send step for one recipient
struct Attempt {
    status_code: Option<u16>,
    result: Result<(), Error>,
}

pub struct NotificationDispatcher {
    channels: Arc<Channels>,
    ledger: Arc<dyn NotificationLedger>,
    events: SequenceEvents,
    timeout: Duration,
    retry_delay: Duration,
    alert_window: chrono::Duration,
}

impl NotificationDispatcher {
    pub fn new(
        channels: Arc<Channels>,
        ledger: Arc<dyn NotificationLedger>,
        config: &NotificationConfig,
        events: SequenceEvents,
    ) -> Self {
        Self {
            channels,
            ledger,
            events,
            timeout: Duration::from_secs(config.timeout_secs),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            alert_window: chrono::Duration::seconds(config.alert_window_secs as i64),
        }
    }

    /// Deliver an alert to every recipient concurrently
    pub async fn dispatch(&self, alert: &Alert, sequence: &Sequence, camera: &Camera, recipients: &[Recipient]) -> DispatchReport {
        let context = TemplateContext::for_alert(alert, sequence, camera);

        let outcomes = join_all(
            recipients
                .iter()
                .map(|recipient| self.dispatch_one(alert, sequence, recipient, &context)),
        )
        .await;

        let mut report = DispatchReport::default();
        for outcome in outcomes {
            match outcome {
                RecipientOutcome::Delivered(id) => report.delivered.push(id),
                RecipientOutcome::Skipped(id) => report.skipped.push(id),
                RecipientOutcome::Failed(failure) => report.failed.push(failure),
            }
        }

        info!(
            "Alert {} for sequence {}: {} delivered, {} skipped, {} failed",
            alert.id,
            sequence.id,
            report.delivered.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    async fn dispatch_one(&self, alert: &Alert, sequence: &Sequence, recipient: &Recipient, context: &TemplateContext) -> RecipientOutcome {
        let since = Utc::now() - self.alert_window;
        match self.ledger.delivered_since(sequence.id, recipient.id, since).await {
            Ok(true) => return RecipientOutcome::Skipped(recipient.id),
            Ok(false) => {}
            Err(e) => {
                // Without history a send could duplicate, the sweeper retries later
                error!("Failed to read delivery history for recipient {}: {}", recipient.id, e);
                return RecipientOutcome::Failed(RecipientFailure {
                    recipient_id: recipient.id,
                    channel: recipient.channel,
                    error: e.to_string(),
                    permanent: false,
                });
            }
        }

        let message = Message {
            subject: recipient.subject_template.as_deref().map(|t| context.render(t)),
            body: context.render(&recipient.message_template),
        };

        let attempt = match self.channels.get(recipient.channel) {
            Some(sender) => self.send_with_retry(sender.as_ref(), &recipient.address, &message).await,
            None => Attempt {
                status_code: None,
                result: Err(Error::PermanentDelivery(format!("no {} channel is configured", recipient.channel))),
            },
        };

        let record = NewNotification {
            alert_id: alert.id,
            sequence_id: sequence.id,
            recipient_id: recipient.id,
            channel: recipient.channel,
            message: message.body,
            status: if attempt.result.is_ok() { NotificationStatus::Sent } else { NotificationStatus::Failed },
            status_code: attempt.status_code.map(i32::from),
            error: attempt.result.as_ref().err().map(|e| e.to_string()),
        };
        let stored = match self.ledger.record(record).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                error!("Failed to record notification for recipient {}: {}", recipient.id, e);
                None
            }
        };

        match attempt.result {
            Ok(()) => RecipientOutcome::Delivered(recipient.id),
            Err(err) => {
                let permanent = !err.is_transient();
                if permanent {
                    error!(
                        "Recipient {} of organization {} is misconfigured: {}",
                        recipient.id, recipient.organization_id, err
                    );
                } else {
                    warn!("Delivery to recipient {} failed: {}", recipient.id, err);
                }
                if let Some(notification) = &stored {
                    self.events.notification_failed(notification).await;
                }
                RecipientOutcome::Failed(RecipientFailure {
                    recipient_id: recipient.id,
                    channel: recipient.channel,
                    error: err.to_string(),
                    permanent,
                })
            }
        }
    }

    async fn send_with_retry(&self, sender: &dyn ChannelSender, destination: &str, message: &Message) -> Attempt {
        let first = self.send_once(sender, destination, message).await;
        match &first.result {
            Err(err) if err.is_transient() => {
                warn!("Retrying {} delivery after transient failure: {}", sender.kind(), err);
                tokio::time::sleep(self.retry_delay).await;
                self.send_once(sender, destination, message).await
            }
            _ => first,
        }
    }

    async fn send_once(&self, sender: &dyn ChannelSender, destination: &str, message: &Message) -> Attempt {
        let kind = sender.kind();
        match tokio::time::timeout(self.timeout, sender.send(destination, message)).await {
            Ok(Ok(status)) => Attempt {
                status_code: Some(status),
                result: classify_status(kind, status).map(|_| ()),
            },
            Ok(Err(err)) => Attempt {
                status_code: None,
                result: Err(classify_failure(kind, &err)),
            },
            Err(_) => Attempt {
                status_code: None,
                result: Err(Error::TransientDelivery(format!(
                    "{} delivery timed out after {:?}",
                    kind, self.timeout
                ))),
            },
        }
    }
}
