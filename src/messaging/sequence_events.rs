use crate::db::models::{Alert, Notification, Sequence};
use crate::messaging::{EventMessage, EventPublisher, EventType};
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Helper for publishing sequence and alerting events.
///
/// Publishing is best effort: failures are logged and never abort the operation
/// that produced the event.
#[derive(Clone, Default)]
pub struct SequenceEvents {
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl SequenceEvents {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher: Some(publisher) }
    }

    /// Events are dropped
    pub fn disabled() -> Self {
        Self { publisher: None }
    }

    async fn emit<T: Serialize>(&self, event_type: EventType, source_id: Option<Uuid>, payload: T) {
        let Some(publisher) = &self.publisher else {
            return;
        };

        let event = match EventMessage::new(event_type.clone(), source_id, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to encode {} event: {}", event_type, e);
                return;
            }
        };

        match publisher.publish(event).await {
            Ok(()) => debug!("Published {} event", event_type),
            Err(e) => warn!("Failed to publish {} event: {}", event_type, e),
        }
    }

    pub async fn sequence_opened(&self, sequence: &Sequence) {
        self.emit(EventType::SequenceOpened, Some(sequence.id), sequence).await;
    }

    pub async fn sequence_extended(&self, sequence: &Sequence) {
        self.emit(EventType::SequenceExtended, Some(sequence.id), sequence).await;
    }

    pub async fn sequence_closed(&self, sequence_id: Uuid, camera_id: Uuid) {
        let payload = serde_json::json!({
            "sequence_id": sequence_id,
            "camera_id": camera_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.emit(EventType::SequenceClosed, Some(sequence_id), payload).await;
    }

    pub async fn sequence_labeled(&self, sequence: &Sequence) {
        let payload = serde_json::json!({
            "sequence_id": sequence.id,
            "camera_id": sequence.camera_id,
            "label": sequence.label(),
        });
        self.emit(EventType::SequenceLabeled, Some(sequence.id), payload).await;
    }

    pub async fn alert_raised(&self, alert: &Alert) {
        self.emit(EventType::AlertRaised, Some(alert.id), alert).await;
    }

    pub async fn notification_failed(&self, notification: &Notification) {
        self.emit(EventType::NotificationFailed, Some(notification.id), notification).await;
    }

    pub async fn system_startup(&self) {
        let payload = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.emit(EventType::SystemStartup, None, payload).await;
    }

    pub async fn system_shutdown(&self) {
        let payload = serde_json::json!({ "timestamp": chrono::Utc::now().to_rfc3339() });
        self.emit(EventType::SystemShutdown, None, payload).await;
    }
}
