use super::{send_request, ChannelSender, Message};
use crate::db::models::ChannelKind;
use anyhow::Result;
use async_trait::async_trait;
use log::debug;

/// Slack incoming webhooks, the recipient address is the webhook URL
pub struct SlackSender {
    client: reqwest::Client,
}

impl SlackSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelSender for SlackSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    async fn send(&self, destination: &str, message: &Message) -> Result<u16> {
        let status = send_request(
            self.client
                .post(destination)
                .json(&serde_json::json!({ "text": message.body })),
        )
        .await?;
        debug!("Slack webhook answered {}", status);
        Ok(status)
    }
}
