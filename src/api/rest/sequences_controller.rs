use crate::api::rest::{ApiResult, AppState, USER_SCOPES};
use crate::db::models::{Alert, Detection, Sequence};
use crate::security::{Claims, Scope};
use crate::services::overlap::{compute_event_groups, SequenceCone, SmokeLocation};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, patch, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_DETECTION_LIMIT: i64 = 10;
const MAX_DETECTION_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct LabelRequest {
    pub is_wildfire: bool,
    /// Honored for admins only
    #[serde(default, rename = "override")]
    pub override_label: bool,
}

#[derive(Debug, Deserialize)]
pub struct DetectionsQuery {
    pub limit: Option<i64>,
}

/// Unlabeled sequence with the event groups it takes part in
#[derive(Debug, Serialize)]
pub struct SequenceWithGroups {
    #[serde(flatten)]
    pub sequence: Sequence,
    pub lat: f64,
    pub lon: f64,
    pub event_groups: Vec<Vec<Uuid>>,
    pub event_smoke_locations: Vec<Option<SmokeLocation>>,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/unlabeled/latest", get(latest_unlabeled))
        .route("/:id", get(get_sequence))
        .route("/:id/detections", get(get_sequence_detections))
        .route("/:id/label", patch(label_sequence))
        .route("/:id/close", post(close_sequence))
        .route("/:id/escalate", post(escalate_sequence))
}

/// Sequence `id` if it belongs to the caller's organization
async fn load_sequence(state: &AppState, claims: &Claims, id: Uuid) -> ApiResult<Sequence> {
    let sequence = state.aggregator.get(id).await?;
    state.camera_for(claims, sequence.camera_id).await?;
    Ok(sequence)
}

pub async fn get_sequence(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Sequence>> {
    claims.require(USER_SCOPES)?;
    Ok(Json(load_sequence(&state, &claims, id).await?))
}

/// Most recent detections first
pub async fn get_sequence_detections(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
    Query(query): Query<DetectionsQuery>,
) -> ApiResult<Json<Vec<Detection>>> {
    claims.require(USER_SCOPES)?;
    load_sequence(&state, &claims, id).await?;

    let limit = query.limit.unwrap_or(DEFAULT_DETECTION_LIMIT).clamp(1, MAX_DETECTION_LIMIT);
    Ok(Json(state.aggregator.detections(id, limit).await?))
}

pub async fn label_sequence(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
    Json(request): Json<LabelRequest>,
) -> ApiResult<Json<Sequence>> {
    claims.require(&[Scope::Admin, Scope::Agent])?;
    load_sequence(&state, &claims, id).await?;

    let allow_override = request.override_label && claims.has_scope(Scope::Admin);
    let sequence = state.aggregator.label(id, request.is_wildfire, allow_override).await?;
    Ok(Json(sequence))
}

pub async fn close_sequence(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Sequence>> {
    claims.require(&[Scope::Admin, Scope::Agent])?;
    load_sequence(&state, &claims, id).await?;
    Ok(Json(state.aggregator.close(id).await?))
}

pub async fn escalate_sequence(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Alert>)> {
    claims.require(&[Scope::Admin, Scope::Agent])?;
    load_sequence(&state, &claims, id).await?;
    Ok((StatusCode::CREATED, Json(state.alerts.escalate(id).await?)))
}

/// Unlabeled sequences of the lookback window, grouped by overlapping cones
pub async fn latest_unlabeled(
    State(state): State<AppState>,
    claims: Claims,
) -> ApiResult<Json<Vec<SequenceWithGroups>>> {
    claims.require(USER_SCOPES)?;

    let since = Utc::now() - state.unlabeled_lookback;
    let recent = state.aggregator.store().recent(claims.organization_id, since).await?;
    let unlabeled: Vec<_> = recent.into_iter().filter(|s| s.sequence.is_wildfire.is_none()).collect();

    let cones: Vec<SequenceCone> = unlabeled
        .iter()
        .map(|s| SequenceCone {
            sequence_id: s.sequence.id,
            lat: s.lat,
            lon: s.lon,
            cone_azimuth: s.sequence.cone_azimuth,
            cone_angle: s.sequence.cone_angle,
            is_wildfire: s.sequence.is_wildfire,
            started_at: s.sequence.started_at,
            last_seen_at: s.sequence.last_seen_at,
        })
        .collect();
    // One entry per input sequence, in input order
    let groups = compute_event_groups(&cones, &state.overlap);
    let result = unlabeled
        .into_iter()
        .zip(groups)
        .map(|(s, g)| SequenceWithGroups {
            sequence: s.sequence,
            lat: s.lat,
            lon: s.lon,
            event_groups: g.event_groups,
            event_smoke_locations: g.event_smoke_locations,
        })
        .collect();

    Ok(Json(result))
}
