use crate::api::rest::{ApiResult, AppState, USER_SCOPES};
use crate::db::models::user_models::AuthToken;
use crate::db::models::{Camera, NewCamera};
use crate::db::repositories::cameras::CamerasRepository;
use crate::security::{Claims, Scope};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use log::info;
use std::sync::Arc;
use uuid::Uuid;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_camera).get(list_cameras))
        .route("/:id", get(get_camera))
        .route("/:id/token", post(create_camera_token))
}

pub async fn create_camera(
    State(state): State<AppState>,
    claims: Claims,
    Json(camera): Json<NewCamera>,
) -> ApiResult<(StatusCode, Json<Camera>)> {
    claims.require(&[Scope::Admin])?;
    state.check_organization(&claims, camera.organization_id)?;

    let created = CamerasRepository::new(Arc::clone(&state.db_pool)).create(&camera).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Cameras of the caller's organization
pub async fn list_cameras(State(state): State<AppState>, claims: Claims) -> ApiResult<Json<Vec<Camera>>> {
    claims.require(USER_SCOPES)?;

    let cameras = CamerasRepository::new(Arc::clone(&state.db_pool))
        .list_by_organization(&claims.organization_id)
        .await?;
    Ok(Json(cameras))
}

pub async fn get_camera(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Camera>> {
    claims.require(USER_SCOPES)?;
    Ok(Json(state.camera_for(&claims, id).await?))
}

/// Mint the long-lived token a camera uses to post detections
pub async fn create_camera_token(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AuthToken>> {
    claims.require(&[Scope::Admin])?;
    let camera = state.camera_for(&claims, id).await?;

    let token = state.security.token_for_camera(camera.id, camera.organization_id)?;
    info!("Issued token for camera {} ({})", camera.name, camera.id);
    Ok(Json(token))
}
