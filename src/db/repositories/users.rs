use crate::{db::models::user_models::User, error::Error};
use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Users repository for handling user operations
#[derive(Clone)]
pub struct UsersRepository {
    pool: Arc<PgPool>,
}

impl UsersRepository {
    /// Create a new users repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a new user
    pub async fn create(&self, user: &User) -> Result<User> {
        info!("Creating new user: {}", user.username);

        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, organization_id, username, password_hash, role, created_at, updated_at, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, organization_id, username, password_hash, role, created_at, updated_at, last_login, active
            "#,
        )
        .bind(user.id)
        .bind(user.organization_id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.active)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| match Error::from_sqlx("Failed to create user", e) {
            Error::Conflict(_) => Error::AlreadyExists("Username already exists".to_string()),
            other => other,
        })?;

        Ok(result)
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, User>(
            r#"
            SELECT id, organization_id, username, password_hash, role, created_at, updated_at, last_login, active
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get user by ID: {}", e)))?;

        Ok(result)
    }

    /// Get user by username
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, User>(
            r#"
            SELECT id, organization_id, username, password_hash, role, created_at, updated_at, last_login, active
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get user by username: {}", e)))?;

        Ok(result)
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to count users: {}", e)))?;

        Ok(count)
    }

    /// Update last login time
    pub async fn update_last_login(&self, id: &Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET last_login = $1
            WHERE id = $2
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update last login: {}", e)))?;

        Ok(())
    }
}
