use crate::config::ApiConfig;
use crate::db::models::Camera;
use crate::error::{domain_error, Error};
use crate::security::auth::AuthService;
use crate::security::{Claims, Scope, SecurityService};
use crate::services::channels::Channels;
use crate::services::storage::Bucket;
use crate::services::{AlertService, SequenceAggregator, WebhookNotifier};
use anyhow::Result;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::{error, info};
use serde::Serialize;
use sqlx::PgPool;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

pub mod alerts_controller;
pub mod auth_controller;
pub mod cameras_controller;
pub mod detections_controller;
pub mod media_controller;
pub mod organizations_controller;
pub mod recipients_controller;
pub mod sequences_controller;
pub mod status_controller;
pub mod webhooks_controller;

/// Scopes held by human accounts
pub const USER_SCOPES: &[Scope] = &[Scope::Admin, Scope::Agent, Scope::User];

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: Arc<PgPool>,
    pub security: Arc<SecurityService>,
    pub auth_service: Arc<AuthService>,
    pub aggregator: Arc<SequenceAggregator>,
    pub alerts: Arc<AlertService>,
    pub webhooks: Arc<WebhookNotifier>,
    /// Used to check recipient addresses on creation
    pub channels: Arc<Channels>,
    pub bucket: Arc<dyn Bucket>,
    pub overlap: crate::config::OverlapConfig,
    pub unlabeled_lookback: chrono::Duration,
    pub media_url_ttl: chrono::Duration,
    /// Organization whose admins may act on every organization
    pub superadmin_org: Option<Uuid>,
}

impl AppState {
    /// Fail unless the caller may act on `organization_id`
    pub fn check_organization(&self, claims: &Claims, organization_id: Uuid) -> Result<(), Error> {
        claims.require_organization(organization_id, self.superadmin_org)
    }

    pub fn is_superadmin(&self, claims: &Claims) -> bool {
        claims.has_scope(Scope::Admin) && self.superadmin_org == Some(claims.organization_id)
    }

    /// Camera `camera_id`, checked against the caller's organization
    pub async fn camera_for(&self, claims: &Claims, camera_id: Uuid) -> Result<Camera> {
        let camera = self
            .aggregator
            .store()
            .camera(camera_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Camera not found: {}", camera_id)))?;
        self.check_organization(claims, camera.organization_id)?;
        Ok(camera)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl ApiError {
    fn new(status: StatusCode, message: String) -> Self {
        Self { message, status: status.as_u16() }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Conflict(_) | Error::AlreadyLabeled(_) | Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::TransientDelivery(_) | Error::PermanentDelivery(_) => StatusCode::BAD_GATEWAY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Authentication(_) => StatusCode::UNAUTHORIZED,
            Error::Authorization(_) => StatusCode::FORBIDDEN,
            Error::Config(_)
            | Error::Database(_)
            | Error::Storage(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Service(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", err);
        }
        ApiError::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = domain_error(&err) {
            return err.clone().into();
        }

        error!("Request failed: {:#}", err);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

/// Implement IntoResponse for ApiError
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

/// Bearer token of the request
#[async_trait]
impl FromRequestParts<AppState> for Claims {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::Authentication("missing Authorization header".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::Authentication("expected a Bearer token".to_string()))?;

        let claims = state.security.verify_token(token.trim())?;
        if claims.has_scope(Scope::Media) {
            return Err(Error::Authentication("media links are not API credentials".to_string()).into());
        }
        Ok(claims)
    }
}

/// Build the full application router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false)
        .max_age(std::time::Duration::from_secs(3600));

    let api = Router::new()
        .nest("/login", auth_controller::create_router())
        .nest("/organizations", organizations_controller::create_router())
        .nest("/cameras", cameras_controller::create_router())
        .nest("/media", media_controller::create_router())
        .nest("/detections", detections_controller::create_router())
        .nest("/sequences", sequences_controller::create_router())
        .nest("/recipients", recipients_controller::create_router())
        .nest("/alerts", alerts_controller::create_router())
        .nest("/webhooks", webhooks_controller::create_router())
        .route("/status", get(status_controller::status));

    Router::new()
        .nest("/api/v1", api)
        .route("/media/*key", get(media_controller::serve_signed))
        .with_state(state)
        .layer(cors)
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Self {
        Self { config: config.clone(), state }
    }

    /// Serve until `shutdown` resolves
    pub async fn run(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let app = router(self.state.clone());

        let addr = format!("{}:{}", self.config.address, self.config.port);
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("Invalid API address {}: {}", addr, e)))?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
