//! API route definitions

use super::handlers::{self, NotificationState};
use super::sse_handlers;
use crate::auth::require_auth;
use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{warn, Span};

/// Request span without the query string, which may carry `?token=`
fn request_span(req: &Request<Body>) -> Span {
    tracing::debug_span!(
        "request",
        method = %req.method(),
        path = req.uri().path(),
        version = ?req.version(),
    )
}

fn cors_layer(state: &NotificationState) -> CorsLayer {
    let frontend_url = state
        .auth_config
        .as_ref()
        .and_then(|auth| auth.frontend_url.as_deref());

    let origin = match frontend_url {
        Some(url) => match HeaderValue::from_str(url.trim_end_matches('/')) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                warn!(frontend_url = url, "Invalid frontend_url, allowing any origin");
                AllowOrigin::from(Any)
            }
        },
        None => AllowOrigin::from(Any),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Create the API router
pub fn create_router(state: NotificationState) -> Router {
    let cors = cors_layer(&state);

    let protected = Router::new()
        // ====================================================================
        // Real-time change notifications
        // ====================================================================
        .route("/api/events/stream", get(sse_handlers::stream_events))
        .route("/api/events/diagnostics", get(handlers::diagnostics))
        // Cross-process publishing
        .route("/internal/events", post(sse_handlers::ingest_event))
        .layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        .merge(protected)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(cors)
        .with_state(state)
}
