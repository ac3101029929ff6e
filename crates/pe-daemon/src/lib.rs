// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! HTTP transport for the provision engine.
//!
//! Every runtime route requires basic credentials, which are forwarded to
//! the platform through a gateway bound to them. Errors are rendered as the
//! JSON form of [`EngineError`].

/// Basic authentication extractor.
pub mod auth;
/// Middleware stack for the engine HTTP API.
pub mod middleware;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path as AxPath, State},
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use pe_core::{ClientRuntime, RuntimeId, SR, ServerlessRuntime, specification_schema};
use pe_error::{EngineError, EngineErrorDto, ErrorCode};
use pe_platform::PlatformConnector;
use pe_runtime::RuntimeOrchestrator;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, warn};

pub use auth::BasicCredentials;

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Create/get/delete use cases.
    pub orchestrator: RuntimeOrchestrator,
    /// Hands out platform gateways bound to request credentials.
    pub connector: Arc<dyn PlatformConnector>,
}

/// An API error with HTTP status code and JSON body.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code.
    pub status: StatusCode,
    /// Serialized error.
    pub body: EngineErrorDto,
}

impl ApiError {
    /// Create a new `ApiError` with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        EngineError::new(code, message).into()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %err, "request failed");
        } else {
            warn!(error = %err, "request rejected");
        }
        Self {
            status,
            body: EngineErrorDto::from(&err),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status.as_u16(), self.body.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut resp = (self.status, Json(self.body)).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            resp.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"provision-engine\""),
            );
        }
        resp
    }
}

/// Build the Axum router with all engine routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/schema", get(cmd_schema))
        .route("/schema/config", get(cmd_config_schema))
        .route("/serverless-runtimes", post(cmd_create))
        .route(
            "/serverless-runtimes/{id}",
            get(cmd_get).put(cmd_update).delete(cmd_delete),
        )
        .with_state(state)
}

/// [`build_app`] wrapped in the request id and request logging middleware.
pub fn build_service(state: Arc<AppState>) -> Router {
    build_app(state)
        .layer(axum::middleware::from_fn(middleware::RequestLogger::layer))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body)
        .map_err(|_| ApiError::new(ErrorCode::InvalidSpecification, "Invalid JSON data"))
}

fn parse_id(raw: &str) -> Result<RuntimeId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::new(ErrorCode::NotFound, format!("{SR} {raw} not found")))
}

async fn cmd_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn cmd_schema() -> impl IntoResponse {
    Json(specification_schema())
}

async fn cmd_config_schema() -> impl IntoResponse {
    Json(pe_config::config_schema())
}

async fn cmd_create(
    State(state): State<Arc<AppState>>,
    BasicCredentials(credentials): BasicCredentials,
    body: Bytes,
) -> Result<(StatusCode, Json<ServerlessRuntime<ClientRuntime>>), ApiError> {
    let specification = parse_body(&body)?;
    let gateway = state.connector.connect(&credentials);
    let document = state
        .orchestrator
        .create(gateway.as_ref(), &credentials.username, &specification)
        .await?;
    Ok((StatusCode::CREATED, Json(document.to_client_view())))
}

async fn cmd_get(
    State(state): State<Arc<AppState>>,
    BasicCredentials(credentials): BasicCredentials,
    AxPath(id): AxPath<String>,
) -> Result<Json<ServerlessRuntime<ClientRuntime>>, ApiError> {
    let id = parse_id(&id)?;
    let gateway = state.connector.connect(&credentials);
    let document = state
        .orchestrator
        .get(gateway.as_ref(), &credentials.username, id)
        .await?;
    Ok(Json(document.to_client_view()))
}

// Answered before authentication: updates are not supported at all.
async fn cmd_update() -> ApiError {
    EngineError::not_implemented(format!("{SR} update")).into()
}

async fn cmd_delete(
    State(state): State<Arc<AppState>>,
    BasicCredentials(credentials): BasicCredentials,
    AxPath(id): AxPath<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    let gateway = state.connector.connect(&credentials);
    state
        .orchestrator
        .delete(gateway.as_ref(), &credentials.username, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
