//! HTTP route handlers for case uploads

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    routing::{delete, get, post},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::types::{CaseError, CaseListing, validate_case_id};
use crate::job::JobRecord;
use crate::server::{ApiErrorResponse, AppState};

/// Multipart field carrying the scan
const UPLOAD_FIELD: &str = "file";

/// Accepted upload suffix
const UPLOAD_SUFFIX: &str = ".nii.gz";

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub case_name: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ListUploadsResponse {
    pub uploads: Vec<CaseListing>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

/// Pull the `file` field out of the form
async fn read_upload(multipart: &mut Multipart) -> Result<Bytes, ApiErrorResponse> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiErrorResponse::new("invalid_upload", e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return Err(CaseError::InvalidUpload("No file selected".to_string()).into());
        }
        if !file_name.to_lowercase().ends_with(UPLOAD_SUFFIX) {
            return Err(CaseError::InvalidUpload("Please upload a .nii.gz file".to_string()).into());
        }
        return field
            .bytes()
            .await
            .map_err(|e| ApiErrorResponse::new("invalid_upload", e.to_string()));
    }
    Err(CaseError::InvalidUpload("No file selected".to_string()).into())
}

/// POST /api/upload - Store a CT volume as a new case
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiErrorResponse> {
    let volume = read_upload(&mut multipart).await?;

    let cases = state.cases.clone();
    let case = tokio::task::spawn_blocking(move || cases.create_case(&volume))
        .await
        .map_err(|e| ApiErrorResponse::new("internal_error", e.to_string()))?
        .map_err(|e| {
            tracing::error!("Upload failed: {}", e);
            ApiErrorResponse::from(e)
        })?;

    state.jobs.replace(&case, JobRecord::uploaded());

    Ok(Json(UploadResponse {
        success: true,
        message: format!("File uploaded as {}. Ready for processing.", case),
        case_name: case,
    }))
}

/// GET /api/list_uploads - List case directories and their files
pub async fn list_uploads(
    State(state): State<AppState>,
) -> Result<Json<ListUploadsResponse>, ApiErrorResponse> {
    let uploads = state.cases.list().map_err(|e| {
        tracing::error!("Failed to list uploads: {}", e);
        ApiErrorResponse::from(e)
    })?;
    Ok(Json(ListUploadsResponse { uploads }))
}

/// DELETE /api/delete_upload/:case - Delete a case and purge its state
pub async fn delete_upload(
    State(state): State<AppState>,
    Path(case): Path<String>,
) -> Result<Json<DeleteResponse>, ApiErrorResponse> {
    validate_case_id(&case)?;
    state.cases.delete(&case).map_err(|e| {
        tracing::warn!("Failed to delete {}: {}", case, e);
        ApiErrorResponse::from(e)
    })?;

    state.runner.purge(&case).await;
    state.sessions.remove(&case);
    state.volumes.evict(&state.cases.input_volume_path(&case));

    Ok(Json(DeleteResponse {
        success: true,
        message: format!("{} deleted.", case),
    }))
}

/// Build case API routes
pub fn case_routes(state: AppState) -> Router {
    let body_limit = state.max_upload_size;
    Router::new()
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/list_uploads", get(list_uploads))
        .route("/delete_upload/:case", delete(delete_upload))
        .with_state(state)
}
