use crate::api::rest::{ApiResult, AppState};
use crate::db::models::{NewWebhook, Webhook};
use crate::db::repositories::webhooks::WebhooksRepository;
use crate::error::Error;
use crate::security::{Claims, Scope};
use crate::services::webhooks::WebhookStore;
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
        .route("/", post(create_webhook).get(list_webhooks))
        .route("/:id", get(get_webhook).delete(delete_webhook))
}

async fn load_webhook(state: &AppState, claims: &Claims, id: Uuid) -> ApiResult<Webhook> {
    let webhook = WebhooksRepository::new(Arc::clone(&state.db_pool))
        .get_by_id(&id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Webhook not found: {}", id)))?;
    state.check_organization(claims, webhook.organization_id)?;
    Ok(webhook)
}

pub async fn create_webhook(
    State(state): State<AppState>,
    claims: Claims,
    Json(webhook): Json<NewWebhook>,
) -> ApiResult<(StatusCode, Json<Webhook>)> {
    claims.require(&[Scope::Admin])?;
    webhook.validate().map_err(Error::InvalidInput)?;
    state.check_organization(&claims, webhook.organization_id)?;

    let created = WebhooksRepository::new(Arc::clone(&state.db_pool)).create(&webhook).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_webhooks(State(state): State<AppState>, claims: Claims) -> ApiResult<Json<Vec<Webhook>>> {
    claims.require(&[Scope::Admin])?;

    let webhooks = WebhooksRepository::new(Arc::clone(&state.db_pool))
        .list_by_organization(claims.organization_id)
        .await?;
    Ok(Json(webhooks))
}

pub async fn get_webhook(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Webhook>> {
    claims.require(&[Scope::Admin])?;
    Ok(Json(load_webhook(&state, &claims, id).await?))
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    claims.require(&[Scope::Admin])?;
    let webhook = load_webhook(&state, &claims, id).await?;

    WebhooksRepository::new(Arc::clone(&state.db_pool)).delete(&id).await?;
    info!("Webhook {} of organization {} deleted by {}", webhook.id, webhook.organization_id, claims.sub);
    Ok(StatusCode::NO_CONTENT)
}
