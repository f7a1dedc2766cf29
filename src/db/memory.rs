//! In-memory stores backing unit tests of the services

use crate::db::models::{
    Alert, AlertReason, Camera, Detection, NewDetection, NewNotification, Notification, NotificationStatus,
    PositionedSequence, Recipient, Sequence, Webhook,
};
use crate::error::Error;
use crate::services::alerting::AlertStore;
use crate::services::cones::{resolve_cone, BoundingBox};
use crate::services::notifications::NotificationLedger;
use crate::services::webhooks::WebhookStore;
use crate::services::sequences::{
    cone_from_detections, plan_ingest, IngestOutcome, IngestPlan, IngestWindow, SequenceStore, SequenceTransition,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct SequenceState {
    cameras: HashMap<Uuid, Camera>,
    sequences: HashMap<Uuid, Sequence>,
    detections: Vec<Detection>,
    fail_next: u32,
}

/// Single-lock store, every ingestion is applied atomically
#[derive(Default)]
pub struct MemorySequenceStore {
    state: Mutex<SequenceState>,
}

impl MemorySequenceStore {
    pub fn add_camera(&self, camera: Camera) {
        self.state.lock().unwrap().cameras.insert(camera.id, camera);
    }

    /// Make the next `n` ingestions lose a simulated race
    pub fn fail_next_ingests(&self, n: u32) {
        self.state.lock().unwrap().fail_next = n;
    }

    /// Store a sequence as is, bypassing ingestion
    pub fn insert_sequence(&self, sequence: Sequence) {
        self.state.lock().unwrap().sequences.insert(sequence.id, sequence);
    }

    pub fn open_sequences(&self, camera_id: Uuid) -> usize {
        let state = self.state.lock().unwrap();
        state
            .sequences
            .values()
            .filter(|s| s.camera_id == camera_id && s.is_open())
            .count()
    }
}

#[async_trait]
impl SequenceStore for MemorySequenceStore {
    async fn ingest(&self, detection: &NewDetection, boxes: &[BoundingBox], window: IngestWindow) -> Result<IngestOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(Error::Conflict("simulated serialization failure".to_string()).into());
        }

        let camera = state
            .cameras
            .get(&detection.camera_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Camera not found: {}", detection.camera_id)))?;
        let now = Utc::now();

        let open = state
            .sequences
            .values()
            .find(|s| s.camera_id == camera.id && s.is_open())
            .cloned();

        let (sequence_id, transition) = match plan_ingest(open.as_ref(), detection.timestamp, window) {
            IngestPlan::Extend { sequence_id } => {
                let seq = state
                    .sequences
                    .get_mut(&sequence_id)
                    .ok_or_else(|| Error::Internal("open sequence vanished".to_string()))?;
                seq.started_at = seq.started_at.min(detection.timestamp);
                seq.last_seen_at = seq.last_seen_at.max(detection.timestamp);
                (sequence_id, SequenceTransition::Extended)
            }
            IngestPlan::Open { close } => {
                if let Some(previous) = close.and_then(|id| state.sequences.get_mut(&id)) {
                    previous.closed_at = Some(now);
                }
                let cone = resolve_cone(detection.azimuth, boxes, camera.angle_of_view)?;
                let seq = Sequence {
                    id: Uuid::new_v4(),
                    camera_id: camera.id,
                    started_at: detection.timestamp,
                    last_seen_at: detection.timestamp,
                    closed_at: None,
                    is_wildfire: None,
                    cone_azimuth: cone.azimuth,
                    cone_angle: cone.angle,
                    created_at: now,
                };
                let id = seq.id;
                state.sequences.insert(id, seq);
                (id, SequenceTransition::Opened { closed_previous: close })
            }
        };

        let stored = Detection {
            id: Uuid::new_v4(),
            camera_id: detection.camera_id,
            sequence_id,
            timestamp: detection.timestamp,
            azimuth: detection.azimuth,
            bboxes: crate::services::cones::format_bboxes(boxes),
            bucket_key: detection.bucket_key.clone(),
            created_at: now,
        };
        state.detections.push(stored.clone());

        let members: Vec<Detection> = state
            .detections
            .iter()
            .filter(|d| d.sequence_id == sequence_id)
            .cloned()
            .collect();
        let cone = cone_from_detections(&members, camera.angle_of_view)?;

        let seq = state
            .sequences
            .get_mut(&sequence_id)
            .ok_or_else(|| Error::Internal("sequence vanished".to_string()))?;
        seq.cone_azimuth = cone.azimuth;
        seq.cone_angle = cone.angle;
        let sequence = seq.clone();

        if let Some(cam) = state.cameras.get_mut(&camera.id) {
            cam.last_active_at = Some(now);
        }

        Ok(IngestOutcome { detection: stored, sequence, transition })
    }

    async fn get(&self, sequence_id: Uuid) -> Result<Option<Sequence>> {
        Ok(self.state.lock().unwrap().sequences.get(&sequence_id).cloned())
    }

    async fn compare_and_set_label(&self, sequence_id: Uuid, expected: Option<bool>, label: bool) -> Result<Option<Sequence>> {
        let mut state = self.state.lock().unwrap();
        match state.sequences.get_mut(&sequence_id) {
            Some(seq) if seq.is_wildfire == expected => {
                seq.is_wildfire = Some(label);
                Ok(Some(seq.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn close(&self, sequence_id: Uuid) -> Result<Option<Sequence>> {
        let mut state = self.state.lock().unwrap();
        Ok(state.sequences.get_mut(&sequence_id).map(|seq| {
            if seq.closed_at.is_none() {
                seq.closed_at = Some(Utc::now());
            }
            seq.clone()
        }))
    }

    async fn detections(&self, sequence_id: Uuid, limit: i64) -> Result<Vec<Detection>> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<Detection> = state
            .detections
            .iter()
            .filter(|d| d.sequence_id == sequence_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn camera(&self, camera_id: Uuid) -> Result<Option<Camera>> {
        Ok(self.state.lock().unwrap().cameras.get(&camera_id).cloned())
    }

    async fn recent(&self, organization_id: Uuid, since: DateTime<Utc>) -> Result<Vec<PositionedSequence>> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<PositionedSequence> = state
            .sequences
            .values()
            .filter(|s| s.last_seen_at >= since)
            .filter_map(|s| {
                let camera = state.cameras.get(&s.camera_id)?;
                (camera.organization_id == organization_id).then(|| PositionedSequence {
                    sequence: s.clone(),
                    lat: camera.lat,
                    lon: camera.lon,
                })
            })
            .collect();
        found.sort_by(|a, b| b.sequence.started_at.cmp(&a.sequence.started_at));
        Ok(found)
    }
}

#[derive(Default)]
pub struct MemoryNotificationLedger {
    records: Mutex<Vec<Notification>>,
}

impl MemoryNotificationLedger {
    pub fn records(&self) -> Vec<Notification> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationLedger for MemoryNotificationLedger {
    async fn delivered_since(&self, sequence_id: Uuid, recipient_id: Uuid, since: DateTime<Utc>) -> Result<bool> {
        Ok(self.records.lock().unwrap().iter().any(|n| {
            n.sequence_id == sequence_id
                && n.recipient_id == recipient_id
                && n.status == NotificationStatus::Sent
                && n.created_at >= since
        }))
    }

    async fn record(&self, notification: NewNotification) -> Result<Notification> {
        let stored = Notification {
            id: Uuid::new_v4(),
            alert_id: notification.alert_id,
            sequence_id: notification.sequence_id,
            recipient_id: notification.recipient_id,
            channel: notification.channel,
            message: notification.message,
            status: notification.status,
            status_code: notification.status_code,
            error: notification.error,
            created_at: Utc::now(),
        };
        self.records.lock().unwrap().push(stored.clone());
        Ok(stored)
    }
}

#[derive(Default)]
struct AlertState {
    alerts: HashMap<Uuid, Alert>,
    claims: HashMap<Uuid, DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryAlertStore {
    state: Mutex<AlertState>,
    recipients: Mutex<Vec<Recipient>>,
}

impl MemoryAlertStore {
    /// Forget the claim on an alert, as if its owner died long ago
    pub fn expire_claim(&self, alert_id: Uuid) {
        self.state.lock().unwrap().claims.remove(&alert_id);
    }

    pub fn add_recipient(&self, recipient: Recipient) {
        self.recipients.lock().unwrap().push(recipient);
    }

    pub fn get(&self, alert_id: Uuid) -> Option<Alert> {
        self.state.lock().unwrap().alerts.get(&alert_id).cloned()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn create(&self, organization_id: Uuid, sequence_id: Uuid, reason: AlertReason) -> Result<Alert> {
        let alert = Alert {
            id: Uuid::new_v4(),
            organization_id,
            sequence_id,
            reason,
            created_at: Utc::now(),
            dispatched_at: None,
        };
        let mut state = self.state.lock().unwrap();
        state.claims.insert(alert.id, alert.created_at);
        state.alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    async fn mark_dispatched(&self, alert_id: Uuid) -> Result<()> {
        match self.state.lock().unwrap().alerts.get_mut(&alert_id) {
            Some(alert) => {
                alert.dispatched_at = Some(Utc::now());
                Ok(())
            }
            None => Err(Error::NotFound(format!("Alert not found: {}", alert_id)).into()),
        }
    }

    async fn claim_undispatched(&self, stale_before: DateTime<Utc>, limit: i64) -> Result<Vec<Alert>> {
        let mut state = self.state.lock().unwrap();
        let mut pending: Vec<Alert> = state
            .alerts
            .values()
            .filter(|a| a.dispatched_at.is_none())
            .filter(|a| state.claims.get(&a.id).map_or(true, |claimed| *claimed <= stale_before))
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.created_at);
        pending.truncate(limit.max(0) as usize);

        let now = Utc::now();
        for alert in &pending {
            state.claims.insert(alert.id, now);
        }
        Ok(pending)
    }

    async fn recipients(&self, organization_id: Uuid) -> Result<Vec<Recipient>> {
        Ok(self
            .recipients
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryWebhookStore {
    webhooks: Mutex<Vec<Webhook>>,
}

impl MemoryWebhookStore {
    pub fn add(&self, organization_id: Uuid, url: &str) -> Webhook {
        let webhook = Webhook { id: Uuid::new_v4(), organization_id, url: url.to_string(), created_at: Utc::now() };
        self.webhooks.lock().unwrap().push(webhook.clone());
        webhook
    }
}

#[async_trait]
impl WebhookStore for MemoryWebhookStore {
    async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<Webhook>> {
        Ok(self
            .webhooks
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.organization_id == organization_id)
            .cloned()
            .collect())
    }
}
