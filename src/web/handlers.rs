//! HTTP request handlers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

use super::AppState;

/// Message returned before the gateway has stored its first packet
pub const NO_DATA_MESSAGE: &str = "No data available yet";

/// API error response, serialized as `{"error": "..."}`
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip)]
    pub status: StatusCode,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            details: None,
            status: StatusCode::NOT_FOUND,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            details: None,
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

/// GET /api/cansat_data
pub async fn cansat_data(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let store = state.store.clone();
    let snapshot = tokio::task::spawn_blocking(move || store.read())
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(|e| {
            error!("Failed to read snapshot: {}", e);
            ApiError::internal(e.to_string())
        })?;

    match snapshot {
        Some(snapshot) => Ok((StatusCode::OK, Json(snapshot)).into_response()),
        None => {
            debug!("No snapshot at {}", state.store.path().display());
            Err(ApiError::not_found(NO_DATA_MESSAGE))
        }
    }
}

/// GET /api/health
pub async fn health() -> Response {
    let body = serde_json::json!({
        "status": "ok",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    });

    (StatusCode::OK, Json(body)).into_response()
}

/// GET / - front-end entry document
pub async fn index(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    let path = state.index_path();
    tokio::fs::read_to_string(&path).await.map(Html).map_err(|e| {
        ApiError::not_found("Front end not built or index.html not found in static directory")
            .with_details(format!("{}: {}", path.display(), e))
    })
}
