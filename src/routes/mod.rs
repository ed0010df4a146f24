use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::app_state::AppState;
use crate::error::{ControllerError, OrchestrationError, PipelineError};

pub mod health;
pub mod items;
pub mod metrics;
pub mod scan;

/// Health and API routes, without the metrics endpoint or HTTP layers.
pub fn api_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/scan-all",
            post(scan::start_scan).get(scan::scan_status),
        )
        .route("/api/v1/scan-all/cancel", post(scan::cancel_scan))
        .route("/api/v1/scan-all/reset", post(scan::reset_scan))
        .route(
            "/api/v1/items/{entity_id}",
            get(items::item_status).delete(items::remove_item),
        )
        .route(
            "/api/v1/items/{entity_id}/upload",
            post(items::upload_files).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}

/// Error body returned by every API route: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        let status = match &err {
            ControllerError::Rejected(OrchestrationError::Precondition(_)) => StatusCode::BAD_REQUEST,
            ControllerError::Rejected(_) => StatusCode::BAD_GATEWAY,
            ControllerError::Busy(_)
            | ControllerError::NeedsReset(_)
            | ControllerError::NotFinished(_) => StatusCode::CONFLICT,
        };
        Self::new(status, err.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Busy { .. } => StatusCode::CONFLICT,
            PipelineError::Failed(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}
