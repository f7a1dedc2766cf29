use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why an alert was raised
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AlertReason {
    /// First detection of a new sequence
    Opened,
    /// Explicit escalation by an operator
    Escalated,
}

/// One escalation event of a sequence
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub sequence_id: Uuid,
    pub reason: AlertReason,
    pub created_at: DateTime<Utc>,
    /// Null until dispatch ran to completion
    pub dispatched_at: Option<DateTime<Utc>>,
}
