//! Router configuration.

use axum::http::Method;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{code, health, recent, AppState};

/// Create the bridge router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/recent", get(recent))
        .route("/code", get(code))
        .layer(create_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Permissive CORS: any origin, read-only methods, no credentials.
pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any)
}
