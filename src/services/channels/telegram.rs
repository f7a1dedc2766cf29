use super::{send_request, ChannelSender, Message};
use crate::db::models::ChannelKind;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};

/// Telegram bot API, the recipient address is the chat id
pub struct TelegramSender {
    client: reqwest::Client,
    api_base: String,
}

impl TelegramSender {
    pub fn new(client: reqwest::Client, api_base: &str, token: &str) -> Self {
        Self {
            client,
            api_base: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send(&self, destination: &str, message: &Message) -> Result<u16> {
        let status = send_request(
            self.client
                .post(self.method_url("sendMessage"))
                .json(&serde_json::json!({ "chat_id": destination, "text": message.body })),
        )
        .await?;
        debug!("Telegram sendMessage to {} answered {}", destination, status);
        Ok(status)
    }

    async fn check_access(&self, destination: &str) -> Result<bool> {
        let status = send_request(
            self.client
                .post(self.method_url("getChat"))
                .json(&serde_json::json!({ "chat_id": destination })),
        )
        .await?;
        if !(200..300).contains(&status) {
            warn!("Telegram chat {} is not reachable by the bot: {}", destination, status);
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::channels::tests::fake_endpoint;

    #[tokio::test]
    async fn sends_to_chat_through_bot_endpoint() {
        let endpoint = fake_endpoint(200);
        let sender = TelegramSender::new(reqwest::Client::new(), &endpoint.url("/"), "42:secret");
        let message = Message { subject: None, body: "smoke".to_string() };

        assert_eq!(sender.send("-100123", &message).await.unwrap(), 200);
        assert!(sender.check_access("-100123").await.unwrap());

        let bodies = endpoint.bodies.lock().unwrap();
        assert_eq!(bodies[0]["chat_id"], "-100123");
        assert_eq!(bodies[0]["text"], "smoke");
    }

    #[tokio::test]
    async fn unknown_chat_fails_access_check() {
        let endpoint = fake_endpoint(400);
        let sender = TelegramSender::new(reqwest::Client::new(), &endpoint.url(""), "42:secret");
        assert!(!sender.check_access("@nobody_here").await.unwrap());
    }
}
