use crate::api::rest::{ApiResult, AppState, USER_SCOPES};
use crate::db::models::Notification;
use crate::db::repositories::alerts::AlertsRepository;
use crate::db::repositories::notifications::NotificationsRepository;
use crate::error::Error;
use crate::security::Claims;
use axum::extract::{Path, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use uuid::Uuid;

pub fn create_router() -> Router<AppState> {
    Router::new().route("/:id/notifications", get(get_alert_notifications))
}

/// Delivery audit trail of one alert
pub async fn get_alert_notifications(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Notification>>> {
    claims.require(USER_SCOPES)?;
    let alert = AlertsRepository::new(Arc::clone(&state.db_pool))
        .get_by_id(&id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Alert not found: {}", id)))?;
    state.check_organization(&claims, alert.organization_id)?;

    let notifications = NotificationsRepository::new(Arc::clone(&state.db_pool))
        .list_by_alert(&id)
        .await?;
    Ok(Json(notifications))
}
