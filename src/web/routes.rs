//! Route definitions for the API and the front end.

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};

use super::handlers;
use super::AppState;

/// API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/cansat_data", get(handlers::cansat_data))
        .route("/api/health", get(handlers::health))
}

/// Front-end routes
///
/// Unknown paths get `index.html` so the single-page app can route them.
pub fn ui_routes(state: &AppState) -> Router<Arc<AppState>> {
    let assets = ServeDir::new(&state.static_dir).fallback(ServeFile::new(state.index_path()));

    Router::new()
        .route("/", get(handlers::index))
        .fallback_service(assets)
}
