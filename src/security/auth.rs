use crate::config::SecurityConfig;
use crate::db::models::user_models::{AuthToken, LoginCredentials, User, UserRole};
use crate::db::models::Organization;
use crate::db::repositories::organizations::OrganizationsRepository;
use crate::db::repositories::users::UsersRepository;
use crate::error::Error;
use crate::security::{password, SecurityService};
use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Username/password login and account bootstrap
pub struct AuthService {
    users_repo: UsersRepository,
    organizations_repo: OrganizationsRepository,
    security: Arc<SecurityService>,
}

impl AuthService {
    pub fn new(pool: Arc<PgPool>, security: Arc<SecurityService>) -> Self {
        Self {
            users_repo: UsersRepository::new(pool.clone()),
            organizations_repo: OrganizationsRepository::new(pool),
            security,
        }
    }

    /// Login a user with username/password
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<(User, AuthToken)> {
        let user = self
            .users_repo
            .get_by_username(&credentials.username)
            .await?
            .ok_or_else(|| Error::Authentication("Invalid username or password".to_string()))?;

        if !user.active {
            return Err(Error::Authentication("User account is inactive".to_string()).into());
        }

        if !password::verify_password(&credentials.password, &user.password_hash)? {
            return Err(Error::Authentication("Invalid username or password".to_string()).into());
        }

        self.users_repo.update_last_login(&user.id).await?;
        let token = self.security.token_for_user(&user)?;

        info!("User logged in: {}", user.username);

        Ok((user, token))
    }

    /// Create an account inside an organization
    pub async fn register(&self, organization_id: Uuid, username: &str, password: &str, role: UserRole) -> Result<User> {
        if username.trim().is_empty() {
            return Err(Error::InvalidInput("username must not be empty".to_string()).into());
        }
        let password_hash = password::hash_password(password, self.security.config())?;

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            organization_id,
            username: username.trim().to_string(),
            password_hash,
            role,
            created_at: now,
            updated_at: now,
            last_login: None,
            active: true,
        };

        let created = self.users_repo.create(&user).await?;
        info!("New {} user registered: {}", role.as_str(), created.username);

        Ok(created)
    }

    /// Create the superadmin organization and account when no user exists.
    ///
    /// Returns the superadmin organization either way.
    pub async fn bootstrap_superadmin(&self) -> Result<Organization> {
        let config: &SecurityConfig = self.security.config();

        let organization = match self.organizations_repo.get_by_name(&config.superadmin_org).await? {
            Some(org) => org,
            None => self.organizations_repo.create(&config.superadmin_org).await?,
        };

        if self.users_repo.count().await? == 0 {
            self.register(
                organization.id,
                &config.superadmin_login,
                &config.superadmin_password,
                UserRole::Admin,
            )
            .await?;
            info!(
                "Bootstrapped superadmin {} in organization {}",
                config.superadmin_login, organization.name
            );
        }

        Ok(organization)
    }
}
