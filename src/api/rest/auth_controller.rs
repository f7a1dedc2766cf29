use crate::api::rest::{ApiResult, AppState};
use crate::db::models::user_models::{AuthToken, LoginCredentials};
use axum::extract::State;
use axum::response::Json;
use axum::routing::post;
use axum::Router;

pub fn create_router() -> Router<AppState> {
    Router::new().route("/creds", post(login_with_credentials))
}

/// Exchange a username and password for an access token
pub async fn login_with_credentials(
    State(state): State<AppState>,
    Json(credentials): Json<LoginCredentials>,
) -> ApiResult<Json<AuthToken>> {
    let (_, token) = state.auth_service.login(&credentials).await?;
    Ok(Json(token))
}
