use crate::{db::models::Detection, error::Error};
use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub(crate) const DETECTION_COLUMNS: &str =
    "id, camera_id, sequence_id, timestamp, azimuth, bboxes, bucket_key, created_at";

/// Read access to detections, writes go through sequence ingestion
#[derive(Clone)]
pub struct DetectionsRepository {
    pool: Arc<PgPool>,
}

impl DetectionsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Detection>> {
        let result = sqlx::query_as::<_, Detection>(&format!(
            "SELECT {} FROM detections WHERE id = $1",
            DETECTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get detection: {}", e)))?;

        Ok(result)
    }
}
