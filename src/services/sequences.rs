//! Folding detections into per-camera sequences.
//!
//! The decision logic lives in pure functions ([`plan_ingest`], [`aggregate_cone`],
//! [`label_transition`]) shared by every [`SequenceStore`]. A store applies them inside
//! whatever serialization its backend offers; the PostgreSQL store locks the camera row
//! for the duration of the ingestion transaction.

use crate::config::SequenceConfig;
use crate::db::models::{Camera, Detection, NewDetection, PositionedSequence, Sequence, SequenceLabel};
use crate::error::{domain_error, Error};
use crate::messaging::SequenceEvents;
use crate::services::cones::{cone_for_box, parse_bboxes, BoundingBox, Cone};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Temporal window deciding whether a detection extends an open sequence
#[derive(Debug, Clone, Copy)]
pub struct IngestWindow {
    pub gap: Duration,
}

impl IngestWindow {
    pub fn from_secs(secs: u64) -> Self {
        Self { gap: Duration::seconds(secs as i64) }
    }

    /// A detection belongs to the open sequence when it is less than one gap after the
    /// last sighting and not more than one gap before the first one.
    pub fn contains(&self, sequence: &Sequence, timestamp: DateTime<Utc>) -> bool {
        timestamp - sequence.last_seen_at < self.gap && timestamp >= sequence.started_at - self.gap
    }
}

/// What ingestion does with the camera's current state
#[derive(Debug, Clone, PartialEq)]
pub enum IngestPlan {
    /// Append to the open sequence
    Extend { sequence_id: Uuid },
    /// Close the prior open sequence, if any, and start a new one
    Open { close: Option<Uuid> },
}

pub fn plan_ingest(open: Option<&Sequence>, timestamp: DateTime<Utc>, window: IngestWindow) -> IngestPlan {
    match open {
        Some(seq) if seq.is_open() && window.contains(seq, timestamp) => {
            IngestPlan::Extend { sequence_id: seq.id }
        }
        Some(seq) if seq.is_open() => IngestPlan::Open { close: Some(seq.id) },
        _ => IngestPlan::Open { close: None },
    }
}

/// Cone of the most confident box across all detections of a sequence.
/// Ties go to the earliest detection, then to box order.
pub fn aggregate_cone<'a, I>(detections: I, aov: f64) -> Result<Cone, Error>
where
    I: IntoIterator<Item = (f64, &'a [BoundingBox])>,
{
    let mut best: Option<(f64, &BoundingBox)> = None;
    for (azimuth, boxes) in detections {
        for b in boxes {
            match best {
                Some((_, current)) if current.confidence >= b.confidence => {}
                _ => best = Some((azimuth, b)),
            }
        }
    }
    let (azimuth, bbox) =
        best.ok_or_else(|| Error::InvalidInput("sequence has no bounding boxes".to_string()))?;
    cone_for_box(azimuth, bbox, aov)
}

/// Recompute a sequence cone from stored detections, oldest first
pub fn cone_from_detections(detections: &[Detection], aov: f64) -> Result<Cone, Error> {
    let mut sorted: Vec<&Detection> = detections.iter().collect();
    sorted.sort_by_key(|d| (d.timestamp, d.created_at));
    let parsed = sorted
        .iter()
        .map(|d| Ok((d.azimuth, parse_bboxes(&d.bboxes)?)))
        .collect::<Result<Vec<_>, Error>>()?;
    aggregate_cone(parsed.iter().map(|(az, boxes)| (*az, boxes.as_slice())), aov)
}

/// Result of a label request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelTransition {
    Unchanged,
    Set { from: Option<bool>, to: bool },
}

pub fn label_transition(current: Option<bool>, requested: bool, allow_override: bool) -> Result<LabelTransition, Error> {
    match current {
        Some(value) if value == requested => Ok(LabelTransition::Unchanged),
        Some(value) if !allow_override => Err(Error::AlreadyLabeled(format!(
            "sequence is already labeled {:?}",
            SequenceLabel::from(Some(value))
        ))),
        _ => Ok(LabelTransition::Set { from: current, to: requested }),
    }
}

/// How ingestion changed the camera's sequences
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SequenceTransition {
    Opened { closed_previous: Option<Uuid> },
    Extended,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub detection: Detection,
    pub sequence: Sequence,
    pub transition: SequenceTransition,
}

impl IngestOutcome {
    pub fn cone(&self) -> Cone {
        Cone { azimuth: self.sequence.cone_azimuth, angle: self.sequence.cone_angle }
    }
}

/// Persistence capability of the aggregator
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Fold a validated detection into the camera's sequences, atomically per camera
    async fn ingest(&self, detection: &NewDetection, boxes: &[BoundingBox], window: IngestWindow) -> Result<IngestOutcome>;

    async fn get(&self, sequence_id: Uuid) -> Result<Option<Sequence>>;

    /// Write `label` only if the stored label still equals `expected`.
    /// Returns `None` when the compare failed.
    async fn compare_and_set_label(&self, sequence_id: Uuid, expected: Option<bool>, label: bool) -> Result<Option<Sequence>>;

    /// Close the sequence if open, returning its current state
    async fn close(&self, sequence_id: Uuid) -> Result<Option<Sequence>>;

    /// Most recent detections first
    async fn detections(&self, sequence_id: Uuid, limit: i64) -> Result<Vec<Detection>>;

    async fn camera(&self, camera_id: Uuid) -> Result<Option<Camera>>;

    /// Sequences of an organization seen since `since`, newest first
    async fn recent(&self, organization_id: Uuid, since: DateTime<Utc>) -> Result<Vec<PositionedSequence>>;
}

/// Per-camera sequence aggregation
pub struct SequenceAggregator {
    store: Arc<dyn SequenceStore>,
    window: IngestWindow,
    max_conflict_retries: u32,
    events: SequenceEvents,
}

impl SequenceAggregator {
    pub fn new(store: Arc<dyn SequenceStore>, config: &SequenceConfig, events: SequenceEvents) -> Self {
        Self {
            store,
            window: IngestWindow::from_secs(config.gap_threshold_secs),
            max_conflict_retries: config.max_conflict_retries,
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn SequenceStore> {
        &self.store
    }

    /// Validate a detection and fold it into its camera's open sequence
    pub async fn ingest(&self, detection: NewDetection) -> Result<IngestOutcome> {
        if !detection.azimuth.is_finite() || !(0.0..360.0).contains(&detection.azimuth) {
            return Err(Error::InvalidInput(format!("azimuth must be in [0, 360), got {}", detection.azimuth)).into());
        }
        let boxes = parse_bboxes(&detection.bboxes)?;

        let mut attempt = 0;
        let outcome = loop {
            match self.store.ingest(&detection, &boxes, self.window).await {
                Ok(outcome) => break outcome,
                Err(err) if matches!(domain_error(&err), Some(Error::Conflict(_))) && attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(
                        "Ingestion race on camera {} (attempt {}/{}): {}",
                        detection.camera_id, attempt, self.max_conflict_retries, err
                    );
                }
                Err(err) => return Err(err),
            }
        };

        match &outcome.transition {
            SequenceTransition::Opened { closed_previous } => {
                info!(
                    "Opened sequence {} for camera {}",
                    outcome.sequence.id, outcome.sequence.camera_id
                );
                if let Some(closed) = closed_previous {
                    self.events.sequence_closed(*closed, outcome.sequence.camera_id).await;
                }
                self.events.sequence_opened(&outcome.sequence).await;
            }
            SequenceTransition::Extended => {
                self.events.sequence_extended(&outcome.sequence).await;
            }
        }

        Ok(outcome)
    }

    pub async fn get(&self, sequence_id: Uuid) -> Result<Sequence> {
        self.store
            .get(sequence_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Sequence not found: {}", sequence_id)).into())
    }

    /// Set the wildfire label; a set label is terminal unless `allow_override`
    pub async fn label(&self, sequence_id: Uuid, is_wildfire: bool, allow_override: bool) -> Result<Sequence> {
        let sequence = self.get(sequence_id).await?;

        match label_transition(sequence.is_wildfire, is_wildfire, allow_override)? {
            LabelTransition::Unchanged => Ok(sequence),
            LabelTransition::Set { from, to } => {
                let updated = match self.store.compare_and_set_label(sequence_id, from, to).await? {
                    Some(updated) => updated,
                    None => {
                        // Someone labeled concurrently, judge the request against the new value
                        let current = self.get(sequence_id).await?;
                        match label_transition(current.is_wildfire, is_wildfire, allow_override)? {
                            LabelTransition::Unchanged => return Ok(current),
                            LabelTransition::Set { .. } => {
                                return Err(Error::Conflict(format!(
                                    "label of sequence {} changed concurrently",
                                    sequence_id
                                ))
                                .into())
                            }
                        }
                    }
                };
                info!("Sequence {} labeled {:?}", sequence_id, updated.label());
                self.events.sequence_labeled(&updated).await;
                Ok(updated)
            }
        }
    }

    /// Close a sequence, later detections of its camera open a new one
    pub async fn close(&self, sequence_id: Uuid) -> Result<Sequence> {
        let before = self.get(sequence_id).await?;
        let sequence = self
            .store
            .close(sequence_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Sequence not found: {}", sequence_id)))?;
        if before.is_open() {
            info!("Closed sequence {}", sequence_id);
            self.events.sequence_closed(sequence.id, sequence.camera_id).await;
        }
        Ok(sequence)
    }

    pub async fn detections(&self, sequence_id: Uuid, limit: i64) -> Result<Vec<Detection>> {
        self.store.detections(sequence_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemorySequenceStore;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 14, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn detection(camera_id: Uuid, at: i64, bboxes: &str) -> NewDetection {
        NewDetection {
            camera_id,
            timestamp: t(at),
            azimuth: 180.0,
            bboxes: bboxes.to_string(),
            bucket_key: None,
        }
    }

    fn setup(gap_secs: u64) -> (SequenceAggregator, Arc<MemorySequenceStore>, Camera) {
        let camera = Camera::test_camera(90.0);
        let store = Arc::new(MemorySequenceStore::default());
        store.add_camera(camera.clone());
        let config = SequenceConfig { gap_threshold_secs: gap_secs, ..SequenceConfig::default() };
        let aggregator = SequenceAggregator::new(store.clone(), &config, SequenceEvents::disabled());
        (aggregator, store, camera)
    }

    const CENTER: &str = "[(0.4,0.1,0.6,0.9,0.5)]";

    #[test]
    fn plan_extends_only_open_sequences_within_gap() {
        let window = IngestWindow::from_secs(60);
        let seq = Sequence {
            id: Uuid::new_v4(),
            camera_id: Uuid::new_v4(),
            started_at: t(0),
            last_seen_at: t(30),
            closed_at: None,
            is_wildfire: None,
            cone_azimuth: 0.0,
            cone_angle: 0.0,
            created_at: t(0),
        };
        assert_eq!(plan_ingest(None, t(0), window), IngestPlan::Open { close: None });
        assert_eq!(plan_ingest(Some(&seq), t(89), window), IngestPlan::Extend { sequence_id: seq.id });
        assert_eq!(plan_ingest(Some(&seq), t(90), window), IngestPlan::Open { close: Some(seq.id) });
        assert_eq!(plan_ingest(Some(&seq), t(-30), window), IngestPlan::Extend { sequence_id: seq.id });
        assert_eq!(plan_ingest(Some(&seq), t(-61), window), IngestPlan::Open { close: Some(seq.id) });

        let closed = Sequence { closed_at: Some(t(40)), ..seq };
        assert_eq!(plan_ingest(Some(&closed), t(45), window), IngestPlan::Open { close: None });
    }

    #[test]
    fn label_transitions_are_terminal_without_override() {
        assert_eq!(
            label_transition(None, true, false).unwrap(),
            LabelTransition::Set { from: None, to: true }
        );
        assert_eq!(label_transition(Some(true), true, false).unwrap(), LabelTransition::Unchanged);
        assert!(matches!(label_transition(Some(true), false, false), Err(Error::AlreadyLabeled(_))));
        assert_eq!(
            label_transition(Some(true), false, true).unwrap(),
            LabelTransition::Set { from: Some(true), to: false }
        );
    }

    #[test]
    fn aggregate_cone_uses_best_box_across_detections() {
        let first = parse_bboxes("[(0.1,0.1,0.2,0.2,0.4)]").unwrap();
        let second = parse_bboxes("[(0.7,0.1,0.9,0.2,0.8),(0.0,0.1,0.1,0.2,0.3)]").unwrap();
        let cone = aggregate_cone([(10.0, first.as_slice()), (20.0, second.as_slice())], 90.0).unwrap();
        // second detection's azimuth, center 0.8 -> 20 + 27
        assert_eq!(cone, Cone { azimuth: 47.0, angle: 18.0 });
    }

    #[tokio::test]
    async fn detections_within_gap_share_a_sequence() {
        let (aggregator, _store, camera) = setup(60);

        let s1 = aggregator.ingest(detection(camera.id, 0, CENTER)).await.unwrap();
        assert_eq!(s1.transition, SequenceTransition::Opened { closed_previous: None });

        let s1b = aggregator.ingest(detection(camera.id, 30, CENTER)).await.unwrap();
        assert_eq!(s1b.transition, SequenceTransition::Extended);
        assert_eq!(s1b.sequence.id, s1.sequence.id);
        assert_eq!(s1b.sequence.last_seen_at, t(30));

        let s2 = aggregator.ingest(detection(camera.id, 200, CENTER)).await.unwrap();
        assert_ne!(s2.sequence.id, s1.sequence.id);
        assert_eq!(s2.transition, SequenceTransition::Opened { closed_previous: Some(s1.sequence.id) });

        let s1_after = aggregator.get(s1.sequence.id).await.unwrap();
        assert_eq!(s1_after.last_seen_at, t(30));
        assert!(!s1_after.is_open());
        assert_eq!(aggregator.detections(s1.sequence.id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn arrival_order_does_not_split_sequences() {
        let (aggregator, _store, camera) = setup(60);

        let late = aggregator.ingest(detection(camera.id, 30, CENTER)).await.unwrap();
        let early = aggregator.ingest(detection(camera.id, 0, CENTER)).await.unwrap();

        assert_eq!(late.sequence.id, early.sequence.id);
        assert_eq!(early.sequence.started_at, t(0));
        assert_eq!(early.sequence.last_seen_at, t(30));
    }

    #[tokio::test]
    async fn cone_follows_most_confident_box_of_the_window() {
        let (aggregator, _store, camera) = setup(60);

        let first = aggregator.ingest(detection(camera.id, 0, "[(0.4,0.1,0.6,0.9,0.5)]")).await.unwrap();
        assert_eq!(first.cone(), Cone { azimuth: 180.0, angle: 18.0 });

        let weaker = aggregator.ingest(detection(camera.id, 10, "[(0.0,0.1,0.1,0.9,0.2)]")).await.unwrap();
        assert_eq!(weaker.cone(), Cone { azimuth: 180.0, angle: 18.0 });

        let stronger = aggregator.ingest(detection(camera.id, 20, "[(0.7,0.1,0.9,0.9,0.9)]")).await.unwrap();
        assert_eq!(stronger.cone(), Cone { azimuth: 207.0, angle: 18.0 });
    }

    #[tokio::test]
    async fn malformed_detection_leaves_sequence_untouched() {
        let (aggregator, _store, camera) = setup(60);
        let opened = aggregator.ingest(detection(camera.id, 0, CENTER)).await.unwrap();

        let err = aggregator.ingest(detection(camera.id, 10, "[(0.9,0.1,0.2,0.9,0.5)]")).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(Error::InvalidInput(_))));

        let seq = aggregator.get(opened.sequence.id).await.unwrap();
        assert_eq!(seq.last_seen_at, t(0));
        assert_eq!(aggregator.detections(seq.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_camera_is_not_found() {
        let (aggregator, _store, _camera) = setup(60);
        let err = aggregator.ingest(detection(Uuid::new_v4(), 0, CENTER)).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_ingestion_keeps_one_open_sequence() {
        let (aggregator, store, camera) = setup(60);
        let aggregator = Arc::new(aggregator);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let aggregator = aggregator.clone();
                let camera_id = camera.id;
                tokio::spawn(async move { aggregator.ingest(detection(camera_id, i, CENTER)).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().sequence.id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.open_sequences(camera.id), 1);
    }

    #[tokio::test]
    async fn lost_races_are_replayed() {
        let (aggregator, store, camera) = setup(60);
        store.fail_next_ingests(2);

        let outcome = aggregator.ingest(detection(camera.id, 0, CENTER)).await.unwrap();
        assert_eq!(outcome.transition, SequenceTransition::Opened { closed_previous: None });

        store.fail_next_ingests(10);
        let err = aggregator.ingest(detection(camera.id, 5, CENTER)).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn labeling_is_idempotent_and_terminal() {
        let (aggregator, _store, camera) = setup(60);
        let seq = aggregator.ingest(detection(camera.id, 0, CENTER)).await.unwrap().sequence;

        let labeled = aggregator.label(seq.id, true, false).await.unwrap();
        assert_eq!(labeled.label(), SequenceLabel::Wildfire);

        let again = aggregator.label(seq.id, true, false).await.unwrap();
        assert_eq!(again.is_wildfire, Some(true));

        let err = aggregator.label(seq.id, false, false).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(Error::AlreadyLabeled(_))));

        let overridden = aggregator.label(seq.id, false, true).await.unwrap();
        assert_eq!(overridden.label(), SequenceLabel::NotWildfire);
    }

    #[tokio::test]
    async fn closed_sequences_reject_late_detections() {
        let (aggregator, _store, camera) = setup(60);
        let first = aggregator.ingest(detection(camera.id, 0, CENTER)).await.unwrap();

        let closed = aggregator.close(first.sequence.id).await.unwrap();
        assert!(!closed.is_open());
        // closing twice is harmless
        assert!(!aggregator.close(first.sequence.id).await.unwrap().is_open());

        let late = aggregator.ingest(detection(camera.id, 5, CENTER)).await.unwrap();
        assert_ne!(late.sequence.id, first.sequence.id);
        assert_eq!(late.transition, SequenceTransition::Opened { closed_previous: None });
    }

    #[tokio::test]
    async fn azimuth_out_of_range_is_invalid() {
        let (aggregator, _store, camera) = setup(60);
        let mut det = detection(camera.id, 0, CENTER);
        det.azimuth = 360.0;
        let err = aggregator.ingest(det).await.unwrap_err();
        assert!(matches!(domain_error(&err), Some(Error::InvalidInput(_))));
    }
}
