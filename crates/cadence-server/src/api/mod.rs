//! HTTP routes

mod speech;

use axum::{
    http::HeaderValue,
    routing::{delete, get, post},
    Router,
};
use cadence_core::ServerConfig;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let router = Router::new()
        // Sessions
        .route("/v1/sessions", post(speech::create_session))
        .route("/v1/sessions/:id", delete(speech::delete_session))
        .route("/v1/sessions/:id/speak", post(speech::speak))
        .route("/v1/sessions/:id/stop", post(speech::stop))
        .route("/v1/sessions/:id/events", get(speech::events))
        // Text answers
        .route("/v1/respond", post(speech::respond))
        // Health check
        .route("/health", get(speech::health))
        .layer(TraceLayer::new_for_http());

    let router = match cors_layer(config) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

fn cors_layer(config: &ServerConfig) -> Option<CorsLayer> {
    if !config.cors_enabled {
        return None;
    }

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_origins.is_empty() || config.cors_origins.iter().any(|o| o == "*") {
        return Some(layer.allow_origin(Any));
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    Some(layer.allow_origin(origins))
}
