//! Forwarding of new detections to the webhooks of their organization.
//!
//! Delivery is best effort: one attempt per webhook, failures are logged and
//! never reach the camera that posted the detection.

use crate::db::models::{Detection, Webhook};
use crate::services::channels::{classify_failure, classify_status, send_request};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, error, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<Webhook>>;
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    store: Arc<dyn WebhookStore>,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, store: Arc<dyn WebhookStore>) -> Self {
        Self { client, store }
    }

    /// Post the detection on a detached task
    pub fn notify_detection(self: &Arc<Self>, organization_id: Uuid, detection: Detection) -> JoinHandle<usize> {
        let notifier = self.clone();
        tokio::spawn(async move { notifier.deliver(organization_id, &detection).await })
    }

    /// Post the detection to every webhook of the organization, returning how many accepted it
    pub async fn deliver(&self, organization_id: Uuid, detection: &Detection) -> usize {
        let webhooks = match self.store.list_by_organization(organization_id).await {
            Ok(webhooks) => webhooks,
            Err(e) => {
                error!("Failed to load webhooks of organization {}: {}", organization_id, e);
                return 0;
            }
        };

        let results = join_all(webhooks.iter().map(|webhook| self.post(webhook, detection))).await;
        results.into_iter().filter(|delivered| *delivered).count()
    }

    async fn post(&self, webhook: &Webhook, detection: &Detection) -> bool {
        let outcome = match send_request(self.client.post(&webhook.url).json(detection)).await {
            Ok(status) => classify_status("webhook", status).map(|_| ()),
            Err(err) => Err(classify_failure("webhook", &err)),
        };

        // The url may carry credentials, webhooks are named by id
        match outcome {
            Ok(()) => {
                debug!("Detection {} posted to webhook {}", detection.id, webhook.id);
                true
            }
            Err(err) if err.is_transient() => {
                warn!("Delivery of detection {} to webhook {} failed: {}", detection.id, webhook.id, err);
                false
            }
            Err(err) => {
                error!(
                    "Webhook {} of organization {} is misconfigured: {}",
                    webhook.id, webhook.organization_id, err
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryWebhookStore;
    use crate::services::channels::tests::fake_endpoint;
    use chrono::Utc;

    fn detection() -> Detection {
        Detection {
            id: Uuid::new_v4(),
            camera_id: Uuid::new_v4(),
            sequence_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            azimuth: 212.0,
            bboxes: "[(0.1,0.1,0.2,0.2,0.9)]".to_string(),
            bucket_key: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failing_webhook_does_not_block_others() {
        let ok = fake_endpoint(200);
        let broken = fake_endpoint(500);
        let organization_id = Uuid::new_v4();
        let store = Arc::new(MemoryWebhookStore::default());
        store.add(organization_id, &broken.url("/hook"));
        store.add(organization_id, &ok.url("/hook"));
        store.add(Uuid::new_v4(), &ok.url("/other"));
        let notifier = WebhookNotifier::new(reqwest::Client::new(), store);
        let detection = detection();

        assert_eq!(notifier.deliver(organization_id, &detection).await, 1);

        let bodies = ok.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["id"], detection.id.to_string());
        assert_eq!(bodies[0]["azimuth"], 212.0);
        assert_eq!(broken.bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn organizations_without_webhooks_post_nothing() {
        let notifier = Arc::new(WebhookNotifier::new(
            reqwest::Client::new(),
            Arc::new(MemoryWebhookStore::default()),
        ));
        let handle = notifier.notify_detection(Uuid::new_v4(), detection());
        assert_eq!(handle.await.unwrap(), 0);
    }
}
