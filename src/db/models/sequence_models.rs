use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sequence model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sequence {
    pub id: Uuid,
    pub camera_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub is_wildfire: Option<bool>,
    pub cone_azimuth: f64,
    pub cone_angle: f64,
    pub created_at: DateTime<Utc>,
}

/// A sequence with the position of its camera
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PositionedSequence {
    #[sqlx(flatten)]
    pub sequence: Sequence,
    pub lat: f64,
    pub lon: f64,
}

impl Sequence {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    pub fn label(&self) -> SequenceLabel {
        SequenceLabel::from(self.is_wildfire)
    }
}

/// Tri-state wildfire label
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SequenceLabel {
    Unlabeled,
    Wildfire,
    NotWildfire,
}

impl From<Option<bool>> for SequenceLabel {
    fn from(flag: Option<bool>) -> Self {
        match flag {
            None => SequenceLabel::Unlabeled,
            Some(true) => SequenceLabel::Wildfire,
            Some(false) => SequenceLabel::NotWildfire,
        }
    }
}

impl From<SequenceLabel> for Option<bool> {
    fn from(label: SequenceLabel) -> Self {
        match label {
            SequenceLabel::Unlabeled => None,
            SequenceLabel::Wildfire => Some(true),
            SequenceLabel::NotWildfire => Some(false),
        }
    }
}
