use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Endpoint receiving every new detection of an organization
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Webhook {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWebhook {
    pub organization_id: Uuid,
    pub url: String,
}

impl NewWebhook {
    pub fn validate(&self) -> Result<(), String> {
        let valid = url::Url::parse(self.url.trim())
            .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
            .unwrap_or(false);
        if !valid {
            return Err(format!("invalid webhook url: {}", self.url));
        }
        Ok(())
    }
}
