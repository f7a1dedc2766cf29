use crate::api::rest::{ApiResult, AppState};
use crate::error::Error;
use crate::security::{Claims, Scope};
use crate::services::storage::{content_type, media_key, organization_of, sniff_extension, validate_key};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, post};
use axum::Router;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub bucket_key: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub token: String,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(upload_media))
        .route("/*key", delete(delete_media))
}

/// Store raw image bytes in the camera's organization folder
pub async fn upload_media(
    State(state): State<AppState>,
    claims: Claims,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    claims.require(&[Scope::Camera])?;
    if body.is_empty() {
        return Err(Error::InvalidInput("empty upload".to_string()).into());
    }

    let key = media_key(claims.organization_id, sniff_extension(&body));
    if !state.bucket.upload(&key, &body).await? {
        return Err(Error::Storage(format!("upload of {} was refused", key)).into());
    }
    let metadata = state.bucket.get_metadata(&key).await?;

    Ok((StatusCode::CREATED, Json(UploadResponse { bucket_key: key, metadata })))
}

pub async fn delete_media(
    State(state): State<AppState>,
    claims: Claims,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    claims.require(&[Scope::Admin])?;
    validate_key(&key)?;
    let organization_id =
        organization_of(&key).ok_or_else(|| Error::NotFound(format!("Media object not found: {}", key)))?;
    state.check_organization(&claims, organization_id)?;

    if !state.bucket.delete(&key).await? {
        return Err(Error::NotFound(format!("Media object not found: {}", key)).into());
    }
    info!("Media object {} deleted by {}", key, claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

/// Target of signed media links
pub async fn serve_signed(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> ApiResult<Response> {
    state.security.verify_media_token(&query.token, &key)?;

    let data = state
        .bucket
        .download(&key)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Media object not found: {}", key)))?;

    Ok(([(header::CONTENT_TYPE, content_type(&key))], data).into_response())
}
