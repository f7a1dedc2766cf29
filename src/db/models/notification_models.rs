use super::recipient_models::ChannelKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Sent,
    Failed,
}

/// Append-only delivery audit record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub sequence_id: Uuid,
    pub recipient_id: Uuid,
    pub channel: ChannelKind,
    pub message: String,
    pub status: NotificationStatus,
    pub status_code: Option<i32>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub alert_id: Uuid,
    pub sequence_id: Uuid,
    pub recipient_id: Uuid,
    pub channel: ChannelKind,
    pub message: String,
    pub status: NotificationStatus,
    pub status_code: Option<i32>,
    pub error: Option<String>,
}
