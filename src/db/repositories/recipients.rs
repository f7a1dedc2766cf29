use crate::{
    db::models::{NewRecipient, Recipient},
    error::Error,
};
use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub(crate) const RECIPIENT_COLUMNS: &str =
    "id, organization_id, channel, address, subject_template, message_template, created_at";

/// Alert destinations of organizations
#[derive(Clone)]
pub struct RecipientsRepository {
    pool: Arc<PgPool>,
}

impl RecipientsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn create(&self, recipient: &NewRecipient) -> Result<Recipient> {
        recipient.validate().map_err(Error::InvalidInput)?;
        info!("Adding {} recipient for organization {}", recipient.channel, recipient.organization_id);

        let result = sqlx::query_as::<_, Recipient>(&format!(
            r#"
            INSERT INTO recipients (id, organization_id, channel, address, subject_template, message_template, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            RECIPIENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(recipient.organization_id)
        .bind(recipient.channel)
        .bind(recipient.address.trim())
        .bind(&recipient.subject_template)
        .bind(&recipient.message_template)
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| match Error::from_sqlx("Failed to create recipient", e) {
            Error::Conflict(_) => Error::AlreadyExists(format!(
                "{} recipient {} already exists",
                recipient.channel, recipient.address
            )),
            other => other,
        })?;

        Ok(result)
    }

    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Recipient>> {
        let result = sqlx::query_as::<_, Recipient>(&format!(
            "SELECT {} FROM recipients WHERE id = $1",
            RECIPIENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get recipient: {}", e)))?;

        Ok(result)
    }

    pub async fn list_by_organization(&self, organization_id: &Uuid) -> Result<Vec<Recipient>> {
        let result = sqlx::query_as::<_, Recipient>(&format!(
            "SELECT {} FROM recipients WHERE organization_id = $1 ORDER BY created_at",
            RECIPIENT_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list recipients: {}", e)))?;

        Ok(result)
    }

    /// Returns false when nothing was deleted
    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recipients WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete recipient: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}
