use crate::db::models::{Camera, Detection, NewDetection, PositionedSequence, Sequence};
use crate::db::repositories::cameras::CAMERA_COLUMNS;
use crate::db::repositories::detections::DETECTION_COLUMNS;
use crate::error::Error;
use crate::services::cones::{format_bboxes, resolve_cone, BoundingBox};
use crate::services::sequences::{
    cone_from_detections, plan_ingest, IngestOutcome, IngestPlan, IngestWindow, SequenceStore, SequenceTransition,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const SEQUENCE_COLUMNS: &str =
    "id, camera_id, started_at, last_seen_at, closed_at, is_wildfire, cone_azimuth, cone_angle, created_at";

/// PostgreSQL sequence store.
///
/// Ingestion locks the camera row for the whole transaction, so concurrent
/// detections of one camera are applied one after the other.
#[derive(Clone)]
pub struct SequencesRepository {
    pool: Arc<PgPool>,
}

impl SequencesRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn ingest_in(
        tx: &mut Transaction<'_, Postgres>,
        detection: &NewDetection,
        boxes: &[BoundingBox],
        window: IngestWindow,
    ) -> Result<IngestOutcome, Error> {
        let camera = sqlx::query_as::<_, Camera>(&format!(
            "SELECT {} FROM cameras WHERE id = $1 FOR UPDATE",
            CAMERA_COLUMNS
        ))
        .bind(detection.camera_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| Error::from_sqlx("Failed to lock camera", e))?
        .ok_or_else(|| Error::NotFound(format!("Camera not found: {}", detection.camera_id)))?;

        let open = sqlx::query_as::<_, Sequence>(&format!(
            "SELECT {} FROM sequences WHERE camera_id = $1 AND closed_at IS NULL",
            SEQUENCE_COLUMNS
        ))
        .bind(camera.id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| Error::from_sqlx("Failed to read open sequence", e))?;

        let now = Utc::now();
        let (sequence_id, transition) = match plan_ingest(open.as_ref(), detection.timestamp, window) {
            IngestPlan::Extend { sequence_id } => {
                sqlx::query(
                    r#"
                    UPDATE sequences
                    SET started_at = LEAST(started_at, $2), last_seen_at = GREATEST(last_seen_at, $2)
                    WHERE id = $1
                    "#,
                )
                .bind(sequence_id)
                .bind(detection.timestamp)
                .execute(&mut **tx)
                .await
                .map_err(|e| Error::from_sqlx("Failed to extend sequence", e))?;
                (sequence_id, SequenceTransition::Extended)
            }
            IngestPlan::Open { close } => {
                if let Some(previous) = close {
                    sqlx::query("UPDATE sequences SET closed_at = $2 WHERE id = $1 AND closed_at IS NULL")
                        .bind(previous)
                        .bind(now)
                        .execute(&mut **tx)
                        .await
                        .map_err(|e| Error::from_sqlx("Failed to close sequence", e))?;
                    debug!("Closed sequence {} of camera {}", previous, camera.id);
                }

                let cone = resolve_cone(detection.azimuth, boxes, camera.angle_of_view)?;
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO sequences (id, camera_id, started_at, last_seen_at, cone_azimuth, cone_angle, created_at)
                    VALUES ($1, $2, $3, $3, $4, $5, $6)
                    "#,
                )
                .bind(id)
                .bind(camera.id)
                .bind(detection.timestamp)
                .bind(cone.azimuth)
                .bind(cone.angle)
                .bind(now)
                .execute(&mut **tx)
                .await
                .map_err(|e| Error::from_sqlx("Failed to open sequence", e))?;
                (id, SequenceTransition::Opened { closed_previous: close })
            }
        };

        let stored = sqlx::query_as::<_, Detection>(&format!(
            r#"
            INSERT INTO detections (id, camera_id, sequence_id, timestamp, azimuth, bboxes, bucket_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            DETECTION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(camera.id)
        .bind(sequence_id)
        .bind(detection.timestamp)
        .bind(detection.azimuth)
        .bind(format_bboxes(boxes))
        .bind(&detection.bucket_key)
        .bind(now)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| Error::from_sqlx("Failed to insert detection", e))?;

        let members = sqlx::query_as::<_, Detection>(&format!(
            "SELECT {} FROM detections WHERE sequence_id = $1",
            DETECTION_COLUMNS
        ))
        .bind(sequence_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| Error::from_sqlx("Failed to read sequence detections", e))?;
        let cone = cone_from_detections(&members, camera.angle_of_view)?;

        let sequence = sqlx::query_as::<_, Sequence>(&format!(
            "UPDATE sequences SET cone_azimuth = $2, cone_angle = $3 WHERE id = $1 RETURNING {}",
            SEQUENCE_COLUMNS
        ))
        .bind(sequence_id)
        .bind(cone.azimuth)
        .bind(cone.angle)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| Error::from_sqlx("Failed to update sequence cone", e))?;

        sqlx::query("UPDATE cameras SET last_active_at = $2 WHERE id = $1")
            .bind(camera.id)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::from_sqlx("Failed to touch camera", e))?;

        Ok(IngestOutcome { detection: stored, sequence, transition })
    }
}

#[async_trait]
impl SequenceStore for SequencesRepository {
    async fn ingest(&self, detection: &NewDetection, boxes: &[BoundingBox], window: IngestWindow) -> Result<IngestOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::from_sqlx("Failed to begin ingestion", e))?;

        // Dropping the transaction on error rolls it back
        let outcome = Self::ingest_in(&mut tx, detection, boxes, window).await?;

        tx.commit()
            .await
            .map_err(|e| Error::from_sqlx("Failed to commit ingestion", e))?;

        if let SequenceTransition::Opened { closed_previous } = &outcome.transition {
            info!(
                "Camera {} opened sequence {} (closed: {:?})",
                outcome.sequence.camera_id, outcome.sequence.id, closed_previous
            );
        }
        Ok(outcome)
    }

    async fn get(&self, sequence_id: Uuid) -> Result<Option<Sequence>> {
        let result = sqlx::query_as::<_, Sequence>(&format!(
            "SELECT {} FROM sequences WHERE id = $1",
            SEQUENCE_COLUMNS
        ))
        .bind(sequence_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get sequence: {}", e)))?;

        Ok(result)
    }

    async fn compare_and_set_label(&self, sequence_id: Uuid, expected: Option<bool>, label: bool) -> Result<Option<Sequence>> {
        let result = sqlx::query_as::<_, Sequence>(&format!(
            r#"
            UPDATE sequences
            SET is_wildfire = $2
            WHERE id = $1 AND is_wildfire IS NOT DISTINCT FROM $3
            RETURNING {}
            "#,
            SEQUENCE_COLUMNS
        ))
        .bind(sequence_id)
        .bind(label)
        .bind(expected)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to label sequence", e))?;

        Ok(result)
    }

    async fn close(&self, sequence_id: Uuid) -> Result<Option<Sequence>> {
        let result = sqlx::query_as::<_, Sequence>(&format!(
            "UPDATE sequences SET closed_at = COALESCE(closed_at, $2) WHERE id = $1 RETURNING {}",
            SEQUENCE_COLUMNS
        ))
        .bind(sequence_id)
        .bind(Utc::now())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::from_sqlx("Failed to close sequence", e))?;

        Ok(result)
    }

    async fn detections(&self, sequence_id: Uuid, limit: i64) -> Result<Vec<Detection>> {
        let result = sqlx::query_as::<_, Detection>(&format!(
            "SELECT {} FROM detections WHERE sequence_id = $1 ORDER BY timestamp DESC LIMIT $2",
            DETECTION_COLUMNS
        ))
        .bind(sequence_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list detections: {}", e)))?;

        Ok(result)
    }

    async fn camera(&self, camera_id: Uuid) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, Camera>(&format!(
            "SELECT {} FROM cameras WHERE id = $1",
            CAMERA_COLUMNS
        ))
        .bind(camera_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera: {}", e)))?;

        Ok(result)
    }

    async fn recent(&self, organization_id: Uuid, since: DateTime<Utc>) -> Result<Vec<PositionedSequence>> {
        let result = sqlx::query_as::<_, PositionedSequence>(
            r#"
            SELECT s.id, s.camera_id, s.started_at, s.last_seen_at, s.closed_at, s.is_wildfire,
                   s.cone_azimuth, s.cone_angle, s.created_at, c.lat, c.lon
            FROM sequences s
            JOIN cameras c ON c.id = s.camera_id
            WHERE c.organization_id = $1 AND s.last_seen_at >= $2
            ORDER BY s.started_at DESC
            "#,
        )
        .bind(organization_id)
        .bind(since)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list recent sequences: {}", e)))?;

        Ok(result)
    }
}
