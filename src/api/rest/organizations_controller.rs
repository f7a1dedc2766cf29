use crate::api::rest::{ApiResult, AppState};
use crate::db::models::Organization;
use crate::db::repositories::organizations::OrganizationsRepository;
use crate::error::Error;
use crate::security::{Claims, Scope};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use log::info;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_organization))
        .route("/:id", get(get_organization))
}

/// Only superadmins create organizations
pub async fn create_organization(
    State(state): State<AppState>,
    claims: Claims,
    Json(request): Json<CreateOrganizationRequest>,
) -> ApiResult<(StatusCode, Json<Organization>)> {
    claims.require(&[Scope::Admin])?;
    if !state.is_superadmin(&claims) {
        return Err(Error::Authorization("only superadmins may create organizations".to_string()).into());
    }
    let name = request.name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("organization name must not be empty".to_string()).into());
    }

    let organization = OrganizationsRepository::new(Arc::clone(&state.db_pool))
        .create(name)
        .await?;
    info!("Organization {} created by {}", organization.name, claims.sub);

    Ok((StatusCode::CREATED, Json(organization)))
}

pub async fn get_organization(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Organization>> {
    claims.require(&[Scope::Admin])?;
    state.check_organization(&claims, id)?;

    let organization = OrganizationsRepository::new(Arc::clone(&state.db_pool))
        .get_by_id(&id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Organization not found: {}", id)))?;

    Ok(Json(organization))
}
