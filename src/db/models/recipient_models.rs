use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));
static TELEGRAM_CHAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?\d+|@[A-Za-z][A-Za-z0-9_]{4,})$").expect("valid chat id regex"));

/// Delivery channel of a recipient
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Slack,
    Telegram,
}

impl Display for ChannelKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Slack => write!(f, "slack"),
            Self::Telegram => write!(f, "telegram"),
        }
    }
}

/// Organization-configured alert destination
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recipient {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub channel: ChannelKind,
    /// Email address, Slack webhook URL or Telegram chat id
    pub address: String,
    pub subject_template: Option<String>,
    pub message_template: String,
    pub created_at: DateTime<Utc>,
}

/// Recipient creation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecipient {
    pub organization_id: Uuid,
    pub channel: ChannelKind,
    pub address: String,
    #[serde(default)]
    pub subject_template: Option<String>,
    pub message_template: String,
}

impl NewRecipient {
    /// Check that the address is a valid identity for the channel
    pub fn validate(&self) -> Result<(), String> {
        if self.message_template.trim().is_empty() {
            return Err("message_template must not be empty".to_string());
        }
        let address = self.address.trim();
        let valid = match self.channel {
            ChannelKind::Email => EMAIL_RE.is_match(address),
            ChannelKind::Slack => url::Url::parse(address)
                .map(|url| url.scheme() == "https" && url.host_str().is_some())
                .unwrap_or(false),
            ChannelKind::Telegram => TELEGRAM_CHAT_RE.is_match(address),
        };
        if !valid {
            return Err(format!("invalid {} address: {}", self.channel, self.address));
        }
        Ok(())
    }
}
