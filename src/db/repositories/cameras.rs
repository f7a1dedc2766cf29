use crate::{
    db::models::{Camera, NewCamera},
    error::Error,
};
use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub(crate) const CAMERA_COLUMNS: &str =
    "id, organization_id, name, angle_of_view, lat, lon, elevation, is_trustable, last_active_at, created_at";

/// Cameras repository for handling camera operations
#[derive(Clone)]
pub struct CamerasRepository {
    pool: Arc<PgPool>,
}

impl CamerasRepository {
    /// Create a new cameras repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Register a camera
    pub async fn create(&self, camera: &NewCamera) -> Result<Camera> {
        camera.validate().map_err(Error::InvalidInput)?;
        info!("Creating new camera: {}", camera.name);

        let result = sqlx::query_as::<_, Camera>(&format!(
            r#"
            INSERT INTO cameras (id, organization_id, name, angle_of_view, lat, lon, elevation, is_trustable, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            CAMERA_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(camera.organization_id)
        .bind(&camera.name)
        .bind(camera.angle_of_view)
        .bind(camera.lat)
        .bind(camera.lon)
        .bind(camera.elevation)
        .bind(camera.is_trustable)
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| match Error::from_sqlx("Failed to create camera", e) {
            Error::Conflict(_) => Error::AlreadyExists(format!("Camera {} already exists", camera.name)),
            other => other,
        })?;

        Ok(result)
    }

    /// Get camera by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, Camera>(&format!(
            "SELECT {} FROM cameras WHERE id = $1",
            CAMERA_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera: {}", e)))?;

        Ok(result)
    }

    /// Cameras of an organization, by name
    pub async fn list_by_organization(&self, organization_id: &Uuid) -> Result<Vec<Camera>> {
        let result = sqlx::query_as::<_, Camera>(&format!(
            "SELECT {} FROM cameras WHERE organization_id = $1 ORDER BY name",
            CAMERA_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list cameras: {}", e)))?;

        Ok(result)
    }
}
