use crate::db::models::Organization;
use crate::error::Error;
use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct OrganizationsRepository {
    pool: Arc<PgPool>,
}

impl OrganizationsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn create(&self, name: &str) -> Result<Organization> {
        info!("Creating organization: {}", name);

        let result = sqlx::query_as::<_, Organization>(
            r#"
            INSERT INTO organizations (id, name, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, name, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| match Error::from_sqlx("Failed to create organization", e) {
            Error::Conflict(_) => Error::AlreadyExists(format!("Organization {} already exists", name)),
            other => other,
        })?;

        Ok(result)
    }

    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Organization>> {
        let result = sqlx::query_as::<_, Organization>(
            r#"
            SELECT id, name, created_at
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get organization: {}", e)))?;

        Ok(result)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Organization>> {
        let result = sqlx::query_as::<_, Organization>(
            r#"
            SELECT id, name, created_at
            FROM organizations
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get organization by name: {}", e)))?;

        Ok(result)
    }
}
