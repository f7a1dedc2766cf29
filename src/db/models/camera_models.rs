use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Camera model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Camera {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    /// Horizontal angle of view in degrees
    pub angle_of_view: f64,
    pub lat: f64,
    pub lon: f64,
    pub elevation: f64,
    pub is_trustable: bool,
    pub last_active_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Camera registration payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCamera {
    pub organization_id: Uuid,
    pub name: String,
    pub angle_of_view: f64,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub elevation: f64,
    #[serde(default = "default_trustable")]
    pub is_trustable: bool,
}

fn default_trustable() -> bool {
    true
}

impl NewCamera {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("camera name must not be empty".to_string());
        }
        if !self.angle_of_view.is_finite() || self.angle_of_view <= 0.0 || self.angle_of_view > 360.0 {
            return Err(format!("angle_of_view must be in (0, 360], got {}", self.angle_of_view));
        }
        if !(-90.0..=90.0).contains(&self.lat) || !(-180.0..=180.0).contains(&self.lon) {
            return Err(format!("invalid position ({}, {})", self.lat, self.lon));
        }
        Ok(())
    }
}

#[cfg(test)]
impl Camera {
    pub(crate) fn test_camera(angle_of_view: f64) -> Camera {
        Camera {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "tower-1".to_string(),
            angle_of_view,
            lat: 44.5,
            lon: 4.2,
            elevation: 600.0,
            is_trustable: true,
            last_active_at: None,
            created_at: Utc::now(),
        }
    }
}
