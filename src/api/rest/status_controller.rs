use crate::api::rest::AppState;
use crate::db;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub database: bool,
    pub version: &'static str,
}

/// Liveness including database reachability
pub async fn status(State(state): State<AppState>) -> (StatusCode, Json<StatusResponse>) {
    let database = db::health_check(&state.db_pool).await;
    let (code, status) = if database {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(StatusResponse { status, database, version: env!("CARGO_PKG_VERSION") }),
    )
}
