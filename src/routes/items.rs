use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::models::item::{ItemTask, UploadFile};
use crate::routes::ApiError;

/// POST /api/v1/items/{entity_id}/upload: Upload files for an entity and
/// start its ingest → scan pipeline in the background.
pub async fn upload_files(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ItemTask>), ApiError> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        if !matches!(field.name(), Some("file") | Some("files")) {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;

        files.push(UploadFile::new(filename, content_type, bytes.to_vec()));
    }

    let started = !files.is_empty();
    let task = state.items.start(&entity_id, files)?;
    let status = if started { StatusCode::ACCEPTED } else { StatusCode::OK };
    Ok((status, Json(task)))
}

/// GET /api/v1/items/{entity_id}: Current pipeline state for an entity.
pub async fn item_status(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Json<ItemTask>, ApiError> {
    state
        .items
        .get(&entity_id)
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("No pipeline for {}", entity_id)))
}

/// DELETE /api/v1/items/{entity_id}: Drop an entity's pipeline, stopping any run.
pub async fn remove_item(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> StatusCode {
    if state.items.remove(&entity_id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
