//! # HTTP Adapter
//!
//! Read-only HTTP surface over the snapshot file plus the built front end.
//!
//! # Endpoints
//!
//! - `GET /api/cansat_data` - Latest snapshot (404 before the first packet)
//! - `GET /api/health` - Liveness and version
//! - `GET /` - Front-end entry document
//! - anything else - static assets, falling back to `index.html` for
//!   client-side routes

mod handlers;
mod routes;

use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::store::SnapshotStore;

pub use handlers::ApiError;

/// Shared application state
#[derive(Debug, Clone)]
pub struct AppState {
    /// Snapshot file written by the gateway process
    pub store: SnapshotStore,
    /// Directory holding the built front end
    pub static_dir: PathBuf,
}

impl AppState {
    pub fn new(store: SnapshotStore, static_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            static_dir: static_dir.into(),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.static_dir.join("index.html")
    }
}

/// Build the complete router with CORS and request tracing
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .merge(routes::ui_routes(&state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
