use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::models::job::ScanAllRequest;
use crate::models::snapshot::ControllerSnapshot;
use crate::routes::ApiError;

/// POST /api/v1/scan-all: Start scanning every action of a project.
pub async fn start_scan(
    State(state): State<AppState>,
    Json(request): Json<ScanAllRequest>,
) -> Result<(StatusCode, Json<ControllerSnapshot>), ApiError> {
    state.scan.start(&request)?;
    Ok((StatusCode::ACCEPTED, Json(state.scan.current_snapshot())))
}

/// GET /api/v1/scan-all: Current scan-all progress.
pub async fn scan_status(State(state): State<AppState>) -> Json<ControllerSnapshot> {
    Json(state.scan.current_snapshot())
}

/// POST /api/v1/scan-all/cancel: Ask the worker to stop the running scan.
pub async fn cancel_scan(
    State(state): State<AppState>,
) -> Result<Json<ControllerSnapshot>, ApiError> {
    if !state.scan.cancel().await {
        return Err(ApiError::new(StatusCode::CONFLICT, "No scan is running"));
    }
    Ok(Json(state.scan.current_snapshot()))
}

/// POST /api/v1/scan-all/reset: Clear a finished scan so another can start.
pub async fn reset_scan(
    State(state): State<AppState>,
) -> Result<Json<ControllerSnapshot>, ApiError> {
    state.scan.reset()?;
    Ok(Json(state.scan.current_snapshot()))
}
