use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Event types published by the platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    // Sequence lifecycle
    SequenceOpened,
    SequenceExtended,
    SequenceClosed,
    SequenceLabeled,

    // Alerting
    AlertRaised,
    NotificationFailed,

    // System events
    SystemStartup,
    SystemShutdown,
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SequenceOpened => write!(f, "sequence.opened"),
            Self::SequenceExtended => write!(f, "sequence.extended"),
            Self::SequenceClosed => write!(f, "sequence.closed"),
            Self::SequenceLabeled => write!(f, "sequence.labeled"),
            Self::AlertRaised => write!(f, "alert.raised"),
            Self::NotificationFailed => write!(f, "notification.failed"),
            Self::SystemStartup => write!(f, "system.startup"),
            Self::SystemShutdown => write!(f, "system.shutdown"),
        }
    }
}

/// Event message structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Unique event ID
    pub id: Uuid,
    pub event_type: EventType,
    /// Event source ID (sequence, alert or notification)
    pub source_id: Option<Uuid>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: serde_json::Value,
}

impl EventMessage {
    pub fn new<T: Serialize>(
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type,
            source_id,
            timestamp: chrono::Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Get the routing key for the event
    pub fn routing_key(&self) -> String {
        match &self.source_id {
            Some(id) => format!("{}.{}", self.event_type, id),
            None => self.event_type.to_string(),
        }
    }
}
