//! Shared server state, error type and the plain JSON handlers

use crate::auth::TokenVerifier;
use crate::gateway::{ConnectionDiagnostics, NotificationGateway};
use crate::AuthConfig;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

/// Shared server state
pub struct ServerState {
    pub gateway: Arc<NotificationGateway>,
    /// Auth config: None means no-auth mode (anonymous claims)
    pub auth_config: Option<AuthConfig>,
    /// Built from `auth_config`; present exactly when it is
    pub verifier: Option<TokenVerifier>,
}

impl ServerState {
    pub fn new(gateway: Arc<NotificationGateway>, auth_config: Option<AuthConfig>) -> Self {
        let verifier = auth_config
            .as_ref()
            .map(|auth| TokenVerifier::new(&auth.jwt_secret));
        Self {
            gateway,
            auth_config,
            verifier,
        }
    }
}

pub type NotificationState = Arc<ServerState>;

// ============================================================================
// Health check
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Streams currently open
    pub streams: u64,
}

/// Health check handler.
///
/// Returns 200 + `"ok"` while serving, 503 + `"shutting_down"` once the
/// gateway has begun shutting down.
pub async fn health(State(state): State<NotificationState>) -> (StatusCode, Json<HealthResponse>) {
    let (http_status, status) = if state.gateway.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        http_status,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            streams: state.gateway.diagnostics().active,
        }),
    )
}

// ============================================================================
// Diagnostics
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DiagnosticsResponse {
    #[serde(flatten)]
    pub connections: ConnectionDiagnostics,
    /// Live bus subscriptions (one per open stream)
    pub subscribers: usize,
    pub high_load_warnings: u64,
    pub warning_threshold: u64,
}

pub async fn diagnostics(State(state): State<NotificationState>) -> Json<DiagnosticsResponse> {
    let gateway = &state.gateway;
    Json(DiagnosticsResponse {
        connections: gateway.diagnostics(),
        subscribers: gateway.bus().subscriber_count(),
        high_load_warnings: gateway.high_load_warnings(),
        warning_threshold: gateway.warning_threshold(),
    })
}

// ============================================================================
// Error handling
// ============================================================================

/// Application error type
#[derive(Debug)]
pub enum AppError {
    Internal(anyhow::Error),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    ServiceUnavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
