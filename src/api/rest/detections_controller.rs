use crate::api::rest::{ApiResult, AppState, USER_SCOPES};
use crate::db::models::{Detection, NewDetection};
use crate::db::repositories::detections::DetectionsRepository;
use crate::error::Error;
use crate::security::{Claims, Scope};
use crate::services::cones::parse_bboxes;
use crate::services::sequences::SequenceTransition;
use crate::services::storage::{organization_of, validate_key};
use chrono::{DateTime, Utc};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use log::error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateDetectionRequest {
    /// Required for admins, cameras post as themselves
    #[serde(default)]
    pub camera_id: Option<Uuid>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub azimuth: f64,
    pub bboxes: String,
    #[serde(default)]
    pub bucket_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DetectionResponse {
    pub detection_id: Uuid,
    pub sequence_id: Uuid,
    pub cone_azimuth: f64,
    pub cone_angle: f64,
    pub transition: SequenceTransition,
    pub alert_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MediaUrlResponse {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_detection))
        .route("/:id", get(get_detection))
        .route("/:id/url", get(get_detection_url))
}

pub async fn create_detection(
    State(state): State<AppState>,
    claims: Claims,
    Json(request): Json<CreateDetectionRequest>,
) -> ApiResult<(StatusCode, Json<DetectionResponse>)> {
    claims.require(&[Scope::Camera, Scope::Admin])?;
    parse_bboxes(&request.bboxes)?;

    let camera_id = if claims.has_scope(Scope::Camera) {
        let own = claims.subject_id()?;
        if request.camera_id.map_or(false, |id| id != own) {
            return Err(Error::Authorization("cameras may only post their own detections".to_string()).into());
        }
        own
    } else {
        request
            .camera_id
            .ok_or_else(|| Error::InvalidInput("camera_id is required".to_string()))?
    };
    let camera = state.camera_for(&claims, camera_id).await?;

    if let Some(key) = &request.bucket_key {
        validate_key(key)?;
        if organization_of(key) != Some(camera.organization_id) {
            return Err(Error::Authorization("bucket key belongs to another organization".to_string()).into());
        }
    }

    let outcome = state
        .aggregator
        .ingest(NewDetection {
            camera_id: camera.id,
            timestamp: request.timestamp.unwrap_or_else(Utc::now),
            azimuth: request.azimuth,
            bboxes: request.bboxes,
            bucket_key: request.bucket_key,
        })
        .await?;

    state
        .webhooks
        .notify_detection(camera.organization_id, outcome.detection.clone());

    // The detection is stored either way
    let alert_id = match state.alerts.on_ingested(&outcome).await {
        Ok(alert) => alert.map(|a| a.id),
        Err(e) => {
            error!("Failed to raise alert for sequence {}: {}", outcome.sequence.id, e);
            None
        }
    };

    let cone = outcome.cone();
    Ok((
        StatusCode::CREATED,
        Json(DetectionResponse {
            detection_id: outcome.detection.id,
            sequence_id: outcome.sequence.id,
            cone_azimuth: cone.azimuth,
            cone_angle: cone.angle,
            transition: outcome.transition,
            alert_id,
        }),
    ))
}

async fn load_detection(state: &AppState, claims: &Claims, id: Uuid) -> ApiResult<Detection> {
    let detection = DetectionsRepository::new(Arc::clone(&state.db_pool))
        .get_by_id(&id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Detection not found: {}", id)))?;
    state.camera_for(claims, detection.camera_id).await?;
    Ok(detection)
}

pub async fn get_detection(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Detection>> {
    claims.require(USER_SCOPES)?;
    Ok(Json(load_detection(&state, &claims, id).await?))
}

/// Temporary link to the detection image
pub async fn get_detection_url(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MediaUrlResponse>> {
    claims.require(USER_SCOPES)?;
    let detection = load_detection(&state, &claims, id).await?;
    let key = detection
        .bucket_key
        .ok_or_else(|| Error::NotFound(format!("Detection {} has no media", id)))?;

    let url = state.bucket.get_public_url(&key, state.media_url_ttl).await?;
    Ok(Json(MediaUrlResponse { url, expires_at: Utc::now() + state.media_url_ttl }))
}
