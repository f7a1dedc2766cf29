use super::{send_request, ChannelSender, Message};
use crate::db::models::ChannelKind;
use anyhow::Result;
use async_trait::async_trait;
use log::debug;

const DEFAULT_SUBJECT: &str = "Wildfire alert";

/// Email through an HTTP mail relay
pub struct EmailSender {
    client: reqwest::Client,
    relay_url: String,
    api_key: Option<String>,
    from: String,
}

impl EmailSender {
    pub fn new(client: reqwest::Client, relay_url: &str, api_key: Option<String>, from: &str) -> Self {
        Self {
            client,
            relay_url: relay_url.to_string(),
            api_key,
            from: from.to_string(),
        }
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, destination: &str, message: &Message) -> Result<u16> {
        let payload = serde_json::json!({
            "from": self.from,
            "to": [destination],
            "subject": message.subject.as_deref().unwrap_or(DEFAULT_SUBJECT),
            "text": message.body,
        });

        let mut request = self.client.post(&self.relay_url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let status = send_request(request).await?;
        debug!("Mail relay answered {} for {}", status, destination);
        Ok(status)
    }
}
