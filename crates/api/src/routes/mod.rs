//! API routes

pub mod health;
pub mod sessions;
pub mod stats;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{auth::require_auth, state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // WebSocket route (auth handled in handler via query parameter)
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    // Public API routes (no auth required) - under /api/v1
    let public_api_routes = Router::new().route("/stats", get(stats::get_stats));

    // Protected API routes (Bearer JWT)
    let protected_api_routes = Router::new()
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/:session_id", get(sessions::get_session))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(protected_api_routes);

    let cors = cors_layer(&state.config.cors_allowed_origins);

    // Combine all routes
    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(state.config.max_message_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Allow the configured origins, or any origin when none are configured
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}
