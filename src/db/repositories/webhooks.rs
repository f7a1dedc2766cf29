use crate::{
    db::models::{NewWebhook, Webhook},
    error::Error,
    services::webhooks::WebhookStore,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const WEBHOOK_COLUMNS: &str = "id, organization_id, url, created_at";

#[derive(Clone)]
pub struct WebhooksRepository {
    pool: Arc<PgPool>,
}

impl WebhooksRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn create(&self, webhook: &NewWebhook) -> Result<Webhook> {
        webhook.validate().map_err(Error::InvalidInput)?;
        info!("Registering webhook for organization {}", webhook.organization_id);

        let result = sqlx::query_as::<_, Webhook>(&format!(
            r#"
            INSERT INTO webhooks (id, organization_id, url, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            WEBHOOK_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(webhook.organization_id)
        .bind(webhook.url.trim())
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| match Error::from_sqlx("Failed to create webhook", e) {
            Error::Conflict(_) => Error::AlreadyExists("webhook is already registered".to_string()),
            other => other,
        })?;

        Ok(result)
    }

    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Webhook>> {
        let result = sqlx::query_as::<_, Webhook>(&format!("SELECT {} FROM webhooks WHERE id = $1", WEBHOOK_COLUMNS))
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to get webhook: {}", e)))?;

        Ok(result)
    }

    /// Returns false when nothing was deleted
    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete webhook: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl WebhookStore for WebhooksRepository {
    async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<Webhook>> {
        let result = sqlx::query_as::<_, Webhook>(&format!(
            "SELECT {} FROM webhooks WHERE organization_id = $1 ORDER BY created_at",
            WEBHOOK_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list webhooks: {}", e)))?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::organizations::OrganizationsRepository;
    use crate::db::test_pool;
    use crate::error::domain_error;

    #[tokio::test]
    async fn webhook_registration_is_unique_per_organization() {
        let Some(pool) = test_pool().await else {
            println!("Skipping PostgreSQL test. Set TEST_DATABASE_URL to run.");
            return;
        };
        let org = OrganizationsRepository::new(pool.clone())
            .create(&format!("org-{}", Uuid::new_v4()))
            .await
            .unwrap();
        let repo = WebhooksRepository::new(pool.clone());
        let new = NewWebhook { organization_id: org.id, url: "https://ops.example.org/fire".to_string() };

        let hook = repo.create(&new).await.unwrap();
        let err = repo.create(&new).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(Error::AlreadyExists(_))));

        assert_eq!(repo.list_by_organization(org.id).await.unwrap().len(), 1);
        assert!(repo.delete(&hook.id).await.unwrap());
        assert!(!repo.delete(&hook.id).await.unwrap());
        assert!(repo.get_by_id(&hook.id).await.unwrap().is_none());
    }
}
