use crate::config::NotificationConfig;
use crate::db::models::{Alert, AlertReason, Recipient, Sequence};
use crate::error::Error;
use crate::messaging::SequenceEvents;
use crate::services::notifications::{DispatchReport, NotificationDispatcher};
use crate::services::sequences::{IngestOutcome, SequenceStore, SequenceTransition};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use uuid::Uuid;

/// Undelivered alerts handled per sweep
const SWEEP_BATCH: i64 = 100;

/// Alert persistence and the recipient directory used to deliver them
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist a new alert, claimed by the caller for its first delivery
    async fn create(&self, organization_id: Uuid, sequence_id: Uuid, reason: AlertReason) -> Result<Alert>;

    async fn mark_dispatched(&self, alert_id: Uuid) -> Result<()>;

    /// Atomically claim undelivered alerts whose last claim is not newer than
    /// `stale_before`. An alert is handed to one caller per claim.
    async fn claim_undispatched(&self, stale_before: DateTime<Utc>, limit: i64) -> Result<Vec<Alert>>;

    async fn recipients(&self, organization_id: Uuid) -> Result<Vec<Recipient>>;
}

/// Turns sequence transitions and escalations into delivered alerts
pub struct AlertService {
    alerts: Arc<dyn AlertStore>,
    sequences: Arc<dyn SequenceStore>,
    dispatcher: Arc<NotificationDispatcher>,
    events: SequenceEvents,
    sweep_interval: Duration,
    sweep_grace: chrono::Duration,
}

impl AlertService {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        sequences: Arc<dyn SequenceStore>,
        dispatcher: Arc<NotificationDispatcher>,
        config: &NotificationConfig,
        events: SequenceEvents,
    ) -> Self {
        Self {
            alerts,
            sequences,
            dispatcher,
            events,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            sweep_grace: chrono::Duration::seconds(config.sweep_grace_secs as i64),
        }
    }

    /// Raise an alert when ingestion opened a new sequence
    pub async fn on_ingested(self: &Arc<Self>, outcome: &IngestOutcome) -> Result<Option<Alert>> {
        match outcome.transition {
            SequenceTransition::Opened { .. } => {
                let alert = self.raise(&outcome.sequence, AlertReason::Opened).await?;
                Ok(Some(alert))
            }
            SequenceTransition::Extended => Ok(None),
        }
    }

    /// Operator-requested escalation of a sequence
    pub async fn escalate(self: &Arc<Self>, sequence_id: Uuid) -> Result<Alert> {
        let sequence = self
            .sequences
            .get(sequence_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Sequence not found: {}", sequence_id)))?;
        self.raise(&sequence, AlertReason::Escalated).await
    }

    async fn raise(self: &Arc<Self>, sequence: &Sequence, reason: AlertReason) -> Result<Alert> {
        let camera = self
            .sequences
            .camera(sequence.camera_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Camera not found: {}", sequence.camera_id)))?;

        let alert = self.alerts.create(camera.organization_id, sequence.id, reason).await?;
        info!("Raised {:?} alert {} for sequence {}", reason, alert.id, sequence.id);
        self.events.alert_raised(&alert).await;

        self.spawn_delivery(alert.clone());
        Ok(alert)
    }

    /// Deliver on a detached task, dropping the caller does not cancel it
    pub fn spawn_delivery(self: &Arc<Self>, alert: Alert) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.deliver(&alert).await {
                error!("Dispatch of alert {} failed, the sweeper will retry: {}", alert.id, e);
            }
        })
    }

    /// Dispatch one alert and mark it done
    pub async fn deliver(&self, alert: &Alert) -> Result<DispatchReport> {
        let sequence = self
            .sequences
            .get(alert.sequence_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Sequence not found: {}", alert.sequence_id)))?;
        let camera = self
            .sequences
            .camera(sequence.camera_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Camera not found: {}", sequence.camera_id)))?;
        let recipients = self.alerts.recipients(alert.organization_id).await?;

        let report = self.dispatcher.dispatch(alert, &sequence, &camera, &recipients).await;
        self.alerts.mark_dispatched(alert.id).await?;
        Ok(report)
    }

    /// Re-drive alerts whose dispatch never completed.
    /// A claim younger than the grace period belongs to a delivery still in flight.
    pub async fn sweep_once(&self) -> Result<usize> {
        let stale_before = Utc::now() - self.sweep_grace;
        let pending = self.alerts.claim_undispatched(stale_before, SWEEP_BATCH).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        info!("Re-driving {} undelivered alerts", pending.len());
        let mut delivered = 0;
        for alert in pending {
            match self.deliver(&alert).await {
                Ok(_) => delivered += 1,
                Err(e) => warn!("Alert {} is still undelivered: {}", alert.id, e),
            }
        }
        Ok(delivered)
    }

    /// Start the sweeper in the background
    pub fn start_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            "Starting alert sweeper with interval of {} seconds",
            self.sweep_interval.as_secs()
        );

        tokio::spawn(async move {
            let mut interval = interval(self.sweep_interval);

            loop {
                interval.tick().await;

                if let Err(e) = self.sweep_once().await {
                    error!("Error sweeping undelivered alerts: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SequenceConfig;
    use crate::db::memory::{MemoryAlertStore, MemoryNotificationLedger, MemorySequenceStore};
    use crate::db::models::{Camera, ChannelKind, NewDetection};
    use crate::messaging::tests::RecordingPublisher;
    use crate::messaging::EventType;
    use crate::services::channels::{ChannelSender, Channels, Message};
    use crate::services::sequences::SequenceAggregator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSender {
        sends: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl ChannelSender for CountingSender {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Slack
        }

        async fn send(&self, _destination: &str, _message: &Message) -> Result<u16> {
            tokio::time::sleep(self.delay).await;
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(200)
        }
    }

    struct Fixture {
        service: Arc<AlertService>,
        aggregator: SequenceAggregator,
        alerts: Arc<MemoryAlertStore>,
        sequences: Arc<MemorySequenceStore>,
        dispatcher: Arc<NotificationDispatcher>,
        config: NotificationConfig,
        sender: Arc<CountingSender>,
        publisher: Arc<RecordingPublisher>,
        camera: Camera,
    }

    impl Fixture {
        /// Another server process sharing the same stores
        fn second_service(&self) -> Arc<AlertService> {
            Arc::new(AlertService::new(
                self.alerts.clone(),
                self.sequences.clone(),
                self.dispatcher.clone(),
                &self.config,
                SequenceEvents::disabled(),
            ))
        }

        fn sends(&self) -> usize {
            self.sender.sends.load(Ordering::SeqCst)
        }
    }

    fn fixture() -> Fixture {
        fixture_with(0, Duration::ZERO)
    }

    fn fixture_with(sweep_grace_secs: u64, send_delay: Duration) -> Fixture {
        let camera = Camera::test_camera(90.0);
        let sequences = Arc::new(MemorySequenceStore::default());
        sequences.add_camera(camera.clone());

        let alerts = Arc::new(MemoryAlertStore::default());
        alerts.add_recipient(Recipient {
            id: Uuid::new_v4(),
            organization_id: camera.organization_id,
            channel: ChannelKind::Slack,
            address: "https://hooks.slack.com/services/x".to_string(),
            subject_template: None,
            message_template: "Smoke at {cone_azimuth}".to_string(),
            created_at: Utc::now(),
        });

        let sender = Arc::new(CountingSender { sends: AtomicUsize::new(0), delay: send_delay });
        let mut channels = Channels::default();
        channels.register(sender.clone());

        let publisher = Arc::new(RecordingPublisher::default());
        let events = SequenceEvents::new(publisher.clone());
        let config = NotificationConfig { sweep_grace_secs, ..NotificationConfig::default() };
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(channels),
            Arc::new(MemoryNotificationLedger::default()),
            &config,
            events.clone(),
        ));
        let service = Arc::new(AlertService::new(
            alerts.clone(),
            sequences.clone(),
            dispatcher.clone(),
            &config,
            events.clone(),
        ));
        let aggregator = SequenceAggregator::new(sequences.clone(), &SequenceConfig::default(), events);

        Fixture { service, aggregator, alerts, sequences, dispatcher, config, sender, publisher, camera }
    }

    fn detection(camera_id: Uuid, offset_secs: i64) -> NewDetection {
        NewDetection {
            camera_id,
            timestamp: Utc::now() + chrono::Duration::seconds(offset_secs),
            azimuth: 90.0,
            bboxes: "[(0.4,0.1,0.6,0.9,0.8)]".to_string(),
            bucket_key: None,
        }
    }

    async fn wait_dispatched(alerts: &MemoryAlertStore, alert_id: Uuid) {
        for _ in 0..100 {
            if alerts.get(alert_id).and_then(|a| a.dispatched_at).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("alert {} was never dispatched", alert_id);
    }

    #[tokio::test]
    async fn opening_a_sequence_raises_and_delivers_an_alert() {
        let fx = fixture();
        let outcome = fx.aggregator.ingest(detection(fx.camera.id, 0)).await.unwrap();

        let alert = fx.service.on_ingested(&outcome).await.unwrap().unwrap();
        assert_eq!(alert.reason, AlertReason::Opened);
        assert_eq!(alert.organization_id, fx.camera.organization_id);

        wait_dispatched(&fx.alerts, alert.id).await;
        assert_eq!(fx.sends(), 1);
        assert!(fx.publisher.types().contains(&EventType::AlertRaised));
    }

    #[tokio::test]
    async fn extending_raises_nothing() {
        let fx = fixture();
        fx.aggregator.ingest(detection(fx.camera.id, 0)).await.unwrap();
        let extended = fx.aggregator.ingest(detection(fx.camera.id, 5)).await.unwrap();

        assert!(fx.service.on_ingested(&extended).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn escalation_inside_alert_window_is_suppressed_per_recipient() {
        let fx = fixture();
        let outcome = fx.aggregator.ingest(detection(fx.camera.id, 0)).await.unwrap();

        let first = fx.service.escalate(outcome.sequence.id).await.unwrap();
        wait_dispatched(&fx.alerts, first.id).await;
        assert_eq!(first.reason, AlertReason::Escalated);

        let second = fx.service.escalate(outcome.sequence.id).await.unwrap();
        wait_dispatched(&fx.alerts, second.id).await;
        let report = fx.service.deliver(&second).await.unwrap();
        assert!(report.delivered.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(fx.sends(), 1);
    }

    #[tokio::test]
    async fn escalating_unknown_sequence_is_not_found() {
        let fx = fixture();
        let err = fx.service.escalate(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(crate::error::domain_error(&err), Some(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn sweeper_redrives_undispatched_alerts() {
        let fx = fixture();
        let outcome = fx.aggregator.ingest(detection(fx.camera.id, 0)).await.unwrap();
        // alert persisted but its delivery task never ran
        let alert = fx
            .alerts
            .create(fx.camera.organization_id, outcome.sequence.id, AlertReason::Opened)
            .await
            .unwrap();

        let delivered = fx.service.sweep_once().await.unwrap();

        assert_eq!(delivered, 1);
        assert!(fx.alerts.get(alert.id).unwrap().dispatched_at.is_some());
        assert_eq!(fx.service.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_sweepers_deliver_an_alert_once() {
        let fx = fixture_with(60, Duration::from_millis(100));
        let other = fx.second_service();
        let outcome = fx.aggregator.ingest(detection(fx.camera.id, 0)).await.unwrap();
        let alert = fx
            .alerts
            .create(fx.camera.organization_id, outcome.sequence.id, AlertReason::Opened)
            .await
            .unwrap();
        // the process that created it died before delivering
        fx.alerts.expire_claim(alert.id);

        let (a, b) = tokio::join!(fx.service.sweep_once(), other.sweep_once());

        assert_eq!(a.unwrap() + b.unwrap(), 1);
        assert_eq!(fx.sends(), 1);
        assert!(fx.alerts.get(alert.id).unwrap().dispatched_at.is_some());
    }

    #[tokio::test]
    async fn sweeper_leaves_fresh_claims_alone() {
        let fx = fixture_with(60, Duration::ZERO);
        let outcome = fx.aggregator.ingest(detection(fx.camera.id, 0)).await.unwrap();
        fx.alerts
            .create(fx.camera.organization_id, outcome.sequence.id, AlertReason::Opened)
            .await
            .unwrap();

        assert_eq!(fx.service.sweep_once().await.unwrap(), 0);
        assert_eq!(fx.sends(), 0);
    }
}
