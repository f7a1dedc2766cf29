use crate::api::rest::{ApiResult, AppState};
use crate::db::models::{NewRecipient, Recipient};
use crate::db::repositories::recipients::RecipientsRepository;
use crate::error::Error;
use crate::security::{Claims, Scope};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, post};
use axum::Router;
use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_recipient).get(list_recipients))
        .route("/:id", delete(delete_recipient))
}

pub async fn create_recipient(
    State(state): State<AppState>,
    claims: Claims,
    Json(recipient): Json<NewRecipient>,
) -> ApiResult<(StatusCode, Json<Recipient>)> {
    claims.require(&[Scope::Admin])?;
    recipient.validate().map_err(Error::InvalidInput)?;
    state.check_organization(&claims, recipient.organization_id)?;

    if let Some(sender) = state.channels.get(recipient.channel) {
        match sender.check_access(recipient.address.trim()).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(Error::InvalidInput(format!(
                    "{} destination {} is not reachable",
                    recipient.channel, recipient.address
                ))
                .into())
            }
            // An unreachable channel says nothing about the destination
            Err(e) => warn!("Could not check {} destination {}: {}", recipient.channel, recipient.address, e),
        }
    }

    let created = RecipientsRepository::new(Arc::clone(&state.db_pool)).create(&recipient).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_recipients(State(state): State<AppState>, claims: Claims) -> ApiResult<Json<Vec<Recipient>>> {
    claims.require(&[Scope::Admin, Scope::Agent])?;

    let recipients = RecipientsRepository::new(Arc::clone(&state.db_pool))
        .list_by_organization(&claims.organization_id)
        .await?;
    Ok(Json(recipients))
}

pub async fn delete_recipient(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    claims.require(&[Scope::Admin])?;
    let repo = RecipientsRepository::new(Arc::clone(&state.db_pool));
    let recipient = repo
        .get_by_id(&id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Recipient not found: {}", id)))?;
    state.check_organization(&claims, recipient.organization_id)?;

    repo.delete(&id).await?;
    info!("Recipient {} ({}) deleted by {}", recipient.address, recipient.channel, claims.sub);
    Ok(StatusCode::NO_CONTENT)
}
