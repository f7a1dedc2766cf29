//! Outbound notification channels.
//!
//! A [`ChannelSender`] posts a rendered message to one destination and reports the HTTP
//! status it received. Classification of that status into delivered, transient or
//! permanent is shared by all channels.

pub mod email;
pub mod slack;
pub mod telegram;

use crate::config::ChannelsConfig;
use crate::db::models::ChannelKind;
use crate::error::{domain_error, Error};
use anyhow::Result;
use async_trait::async_trait;
use log::info;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

pub use email::EmailSender;
pub use slack::SlackSender;
pub use telegram::TelegramSender;

/// Rendered notification
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Only used by email
    pub subject: Option<String>,
    pub body: String,
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Post the message and return the HTTP status of the channel's answer.
    /// Transport failures are errors, non-2xx answers are not.
    async fn send(&self, destination: &str, message: &Message) -> Result<u16>;

    /// Whether the destination is reachable by this channel
    async fn check_access(&self, _destination: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Map an endpoint answer to the delivery outcome. Only server errors are worth a retry.
pub fn classify_status(kind: impl Display, status: u16) -> Result<u16, Error> {
    match status {
        200..=299 => Ok(status),
        500..=599 => Err(Error::TransientDelivery(format!("{} answered with status {}", kind, status))),
        _ => Err(Error::PermanentDelivery(format!("{} rejected the message with status {}", kind, status))),
    }
}

/// Map a failed send call to the delivery outcome
pub fn classify_failure(kind: impl Display, err: &anyhow::Error) -> Error {
    if let Some(domain) = domain_error(err) {
        return domain.clone();
    }
    match err.downcast_ref::<reqwest::Error>() {
        Some(e) if e.is_builder() => Error::PermanentDelivery(format!("{} request is invalid: {}", kind, e)),
        _ => Error::TransientDelivery(format!("{} delivery failed: {}", kind, err)),
    }
}

/// Send the request and return the answer's status.
/// Errors never carry the URL, it may embed credentials.
pub(crate) async fn send_request(request: reqwest::RequestBuilder) -> Result<u16> {
    let response = request.send().await.map_err(reqwest::Error::without_url)?;
    Ok(response.status().as_u16())
}

pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)).into())
}

/// Channel adapters available to the dispatcher
#[derive(Clone, Default)]
pub struct Channels {
    senders: HashMap<ChannelKind, Arc<dyn ChannelSender>>,
}

impl Channels {
    /// Enable every channel whose credentials are configured
    pub fn from_config(config: &ChannelsConfig, timeout: Duration) -> Result<Self> {
        let client = http_client(timeout)?;
        let mut channels = Self::default();

        if config.slack_enabled {
            channels.register(Arc::new(SlackSender::new(client.clone())));
        }
        if let Some(token) = &config.telegram_token {
            channels.register(Arc::new(TelegramSender::new(
                client.clone(),
                &config.telegram_api_base,
                token,
            )));
        }
        if let Some(relay) = &config.email_relay_url {
            channels.register(Arc::new(EmailSender::new(
                client,
                relay,
                config.email_api_key.clone(),
                &config.email_sender,
            )));
        }

        let enabled: Vec<String> = channels.senders.keys().map(|k| k.to_string()).collect();
        info!("Notification channels enabled: {:?}", enabled);
        Ok(channels)
    }

    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        self.senders.insert(sender.kind(), sender);
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(&kind).cloned()
    }
}
