use crate::config::SecurityConfig;
use crate::db::models::user_models::{AuthToken, User, UserRole};
use crate::error::Error;
use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod auth;
pub mod password;

/// Permission carried by a token
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Admin,
    Agent,
    User,
    Camera,
    /// Read access to one media object, only used in signed URLs
    Media,
}

impl From<UserRole> for Scope {
    fn from(role: UserRole) -> Self {
        match role {
            UserRole::Admin => Scope::Admin,
            UserRole::Agent => Scope::Agent,
            UserRole::User => Scope::User,
        }
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id, camera id or media key
    pub sub: String,
    pub scopes: Vec<Scope>,
    pub organization_id: Uuid,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
}

impl Claims {
    pub fn subject_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub)
            .map_err(|e| Error::Authentication(format!("Invalid subject in token: {}", e)).into())
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }

    pub fn has_any_scope(&self, scopes: &[Scope]) -> bool {
        scopes.iter().any(|s| self.has_scope(*s))
    }

    /// Require one of `scopes`, otherwise `Authorization`
    pub fn require(&self, scopes: &[Scope]) -> Result<(), Error> {
        if self.has_any_scope(scopes) {
            Ok(())
        } else {
            Err(Error::Authorization(format!("requires one of the scopes {:?}", scopes)))
        }
    }

    /// Superadmin organization members may act on any organization
    pub fn require_organization(&self, organization_id: Uuid, superadmin_org: Option<Uuid>) -> Result<(), Error> {
        let is_superadmin = self.has_scope(Scope::Admin) && superadmin_org == Some(self.organization_id);
        if self.organization_id == organization_id || is_superadmin {
            Ok(())
        } else {
            Err(Error::Authorization("resource belongs to another organization".to_string()))
        }
    }
}

/// Token issuing and verification
pub struct SecurityService {
    config: SecurityConfig,
}

impl SecurityService {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Sign a token for `subject`
    pub fn issue_token(&self, subject: &str, scopes: Vec<Scope>, organization_id: Uuid, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            scopes,
            organization_id,
            exp: (now + ttl).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| Error::Authentication(format!("Failed to generate JWT token: {}", e)))?;

        Ok(token)
    }

    /// Validate and decode a token
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| Error::Authentication(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }

    pub fn token_for_user(&self, user: &User) -> Result<AuthToken> {
        let minutes = self.config.jwt_expiration_minutes;
        let token = self.issue_token(
            &user.id.to_string(),
            vec![Scope::from(user.role)],
            user.organization_id,
            Duration::minutes(minutes as i64),
        )?;
        Ok(AuthToken {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_in: minutes * 60,
        })
    }

    pub fn token_for_camera(&self, camera_id: Uuid, organization_id: Uuid) -> Result<AuthToken> {
        let minutes = self.config.camera_token_expiration_minutes;
        let token = self.issue_token(
            &camera_id.to_string(),
            vec![Scope::Camera],
            organization_id,
            Duration::minutes(minutes as i64),
        )?;
        Ok(AuthToken {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_in: minutes * 60,
        })
    }

    /// Signed read access to one media object
    pub fn media_token(&self, key: &str, organization_id: Uuid, ttl: Duration) -> Result<String> {
        self.issue_token(key, vec![Scope::Media], organization_id, ttl)
    }

    pub fn verify_media_token(&self, token: &str, key: &str) -> Result<Claims> {
        let claims = self.verify_token(token)?;
        if !claims.has_scope(Scope::Media) || claims.sub != key {
            return Err(Error::Authorization("token does not grant access to this object".to_string()).into());
        }
        Ok(claims)
    }
}
