use crate::{
    db::models::{Alert, AlertReason, Recipient},
    db::repositories::recipients::RecipientsRepository,
    error::Error,
    services::alerting::AlertStore,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const ALERT_COLUMNS: &str = "id, organization_id, sequence_id, reason, created_at, dispatched_at";

#[derive(Clone)]
pub struct AlertsRepository {
    pool: Arc<PgPool>,
    recipients: RecipientsRepository,
}

impl AlertsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        let recipients = RecipientsRepository::new(pool.clone());
        Self { pool, recipients }
    }

    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Alert>> {
        let result = sqlx::query_as::<_, Alert>(&format!("SELECT {} FROM alerts WHERE id = $1", ALERT_COLUMNS))
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to get alert: {}", e)))?;

        Ok(result)
    }

}

#[async_trait]
impl AlertStore for AlertsRepository {
    async fn create(&self, organization_id: Uuid, sequence_id: Uuid, reason: AlertReason) -> Result<Alert> {
        let result = sqlx::query_as::<_, Alert>(&format!(
            r#"
            INSERT INTO alerts (id, organization_id, sequence_id, reason, created_at, claimed_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {}
            "#,
            ALERT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(organization_id)
        .bind(sequence_id)
        .bind(reason)
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to create alert", e))?;

        Ok(result)
    }

    async fn mark_dispatched(&self, alert_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE alerts SET dispatched_at = COALESCE(dispatched_at, $2) WHERE id = $1")
            .bind(alert_id)
            .bind(Utc::now())
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to mark alert dispatched: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Alert not found: {}", alert_id)).into());
        }
        Ok(())
    }

    async fn claim_undispatched(&self, stale_before: DateTime<Utc>, limit: i64) -> Result<Vec<Alert>> {
        // Rows locked by another claimer are skipped, rows it already claimed fail the recheck
        let result = sqlx::query_as::<_, Alert>(&format!(
            r#"
            UPDATE alerts SET claimed_at = $2
            WHERE id IN (
                SELECT id FROM alerts
                WHERE dispatched_at IS NULL AND (claimed_at IS NULL OR claimed_at <= $1)
                ORDER BY created_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            ALERT_COLUMNS
        ))
        .bind(stale_before)
        .bind(Utc::now())
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to claim pending alerts: {}", e)))?;

        Ok(result)
    }

    async fn recipients(&self, organization_id: Uuid) -> Result<Vec<Recipient>> {
        self.recipients.list_by_organization(&organization_id).await
    }
}
