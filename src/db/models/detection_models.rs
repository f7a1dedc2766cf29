use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Detection model, immutable once stored
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Detection {
    pub id: Uuid,
    pub camera_id: Uuid,
    pub sequence_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Camera heading at capture time, in degrees
    pub azimuth: f64,
    /// Canonical box list `[(xmin,ymin,xmax,ymax,conf),...]`
    pub bboxes: String,
    pub bucket_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A detection before it is attached to a sequence
#[derive(Debug, Clone)]
pub struct NewDetection {
    pub camera_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub azimuth: f64,
    pub bboxes: String,
    pub bucket_key: Option<String>,
}
