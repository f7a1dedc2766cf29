use crate::{
    db::models::{NewNotification, Notification},
    error::Error,
    services::notifications::NotificationLedger,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const NOTIFICATION_COLUMNS: &str =
    "id, alert_id, sequence_id, recipient_id, channel, message, status, status_code, error, created_at";

/// Delivery audit trail
#[derive(Clone)]
pub struct NotificationsRepository {
    pool: Arc<PgPool>,
}

impl NotificationsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn list_by_alert(&self, alert_id: &Uuid) -> Result<Vec<Notification>> {
        let result = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {} FROM notifications WHERE alert_id = $1 ORDER BY created_at",
            NOTIFICATION_COLUMNS
        ))
        .bind(alert_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list notifications: {}", e)))?;

        Ok(result)
    }
}

#[async_trait]
impl NotificationLedger for NotificationsRepository {
    async fn delivered_since(&self, sequence_id: Uuid, recipient_id: Uuid, since: DateTime<Utc>) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM notifications
                WHERE sequence_id = $1 AND recipient_id = $2 AND status = 'sent' AND created_at >= $3
            )
            "#,
        )
        .bind(sequence_id)
        .bind(recipient_id)
        .bind(since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to check delivery history: {}", e)))?;

        Ok(found)
    }

    async fn record(&self, notification: NewNotification) -> Result<Notification> {
        let result = sqlx::query_as::<_, Notification>(&format!(
            r#"
            INSERT INTO notifications
                (id, alert_id, sequence_id, recipient_id, channel, message, status, status_code, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(notification.alert_id)
        .bind(notification.sequence_id)
        .bind(notification.recipient_id)
        .bind(notification.channel)
        .bind(&notification.message)
        .bind(notification.status)
        .bind(notification.status_code)
        .bind(&notification.error)
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to record notification: {}", e)))?;

        Ok(result)
    }
}
