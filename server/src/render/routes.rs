//! HTTP route handlers for slice images and previews

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};

use super::slice::RenderedSlice;
use crate::case::validate_case_id;
use crate::server::{ApiErrorResponse, AppState};
use crate::volume::VolumeInfo;

/// Response header carrying the slice index actually rendered
pub const SLICE_INDEX_HEADER: HeaderName = HeaderName::from_static("x-slice-index");

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageInfo {
    pub shape: [usize; 3],
    pub max_slice: usize,
    pub spacing: [f32; 3],
}

impl From<VolumeInfo> for ImageInfo {
    fn from(info: VolumeInfo) -> Self {
        Self {
            max_slice: info.max_slice(),
            shape: info.shape,
            spacing: info.spacing,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageInfoResponse {
    pub success: bool,
    pub info: ImageInfo,
}

fn png_response(rendered: RenderedSlice) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
            (SLICE_INDEX_HEADER, rendered.index.to_string()),
        ],
        rendered.png,
    )
        .into_response()
}

fn join_error(e: tokio::task::JoinError) -> ApiErrorResponse {
    ApiErrorResponse::new("internal_error", e.to_string())
}

/// Preview files are flat `*.png` names
fn valid_preview_name(name: &str) -> bool {
    name.ends_with(".png")
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

/// GET /api/image_info/:case - Shape, last slice index and spacing
pub async fn image_info(
    State(state): State<AppState>,
    Path(case): Path<String>,
) -> Result<Json<ImageInfoResponse>, ApiErrorResponse> {
    validate_case_id(&case)?;
    let path = state.cases.input_volume_path(&case);
    let volumes = state.volumes.clone();
    let info = tokio::task::spawn_blocking(move || volumes.info(&path))
        .await
        .map_err(join_error)?
        .map_err(|e| {
            tracing::warn!("Failed to read image info for {}: {}", case, e);
            ApiErrorResponse::from(e)
        })?;

    Ok(Json(ImageInfoResponse {
        success: true,
        info: info.into(),
    }))
}

/// GET /api/original_slice/:case/:slice - Windowed CT slice as PNG
pub async fn original_slice(
    State(state): State<AppState>,
    Path((case, slice)): Path<(String, usize)>,
) -> Result<Response, ApiErrorResponse> {
    validate_case_id(&case)?;
    let path = state.cases.input_volume_path(&case);
    let volumes = state.volumes.clone();
    let renderer = state.renderer.clone();

    let rendered = tokio::task::spawn_blocking(move || {
        let volume = volumes.get_or_load(&path)?;
        renderer.render(&volume, slice, None, &[])
    })
    .await
    .map_err(join_error)?
    .map_err(|e| {
        tracing::warn!("Failed to render slice {} of {}: {}", slice, case, e);
        ApiErrorResponse::from(e)
    })?;

    Ok(png_response(rendered))
}

/// GET /api/slice_with_overlay/:case/:slice - CT slice with the session mask and points
///
/// Falls back to the plain slice when the case has no interactive session.
pub async fn slice_with_overlay(
    State(state): State<AppState>,
    Path((case, slice)): Path<(String, usize)>,
) -> Result<Response, ApiErrorResponse> {
    validate_case_id(&case)?;
    let Some(session) = state.sessions.get(&case) else {
        return original_slice(State(state), Path((case, slice))).await;
    };
    let renderer = state.renderer.clone();

    let rendered = tokio::task::spawn_blocking(move || {
        let volume = session.volume();
        session
            .with_mask(|mask, points| renderer.render(volume, slice, Some(mask), points))
            .map_err(ApiErrorResponse::from)?
            .map_err(ApiErrorResponse::from)
    })
    .await
    .map_err(join_error)?
    .inspect_err(|e| tracing::warn!("Failed to render overlay for {}: {}", case, e.error))?;

    Ok(png_response(rendered))
}

/// GET /api/segmentation_preview/:case/:file - A generated preview PNG
pub async fn segmentation_preview(
    State(state): State<AppState>,
    Path((case, file)): Path<(String, String)>,
) -> Result<Response, ApiErrorResponse> {
    validate_case_id(&case)?;
    if !valid_preview_name(&file) {
        return Err(ApiErrorResponse::new(
            "invalid_file_name",
            format!("Invalid preview name: {:?}", file),
        ));
    }

    let path = state.preview_dir.join(&case).join(&file);
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            ApiErrorResponse::new("not_found", format!("Preview not found: {}/{}", case, file))
        }
        _ => ApiErrorResponse::new("io_error", e.to_string()),
    })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        bytes,
    )
        .into_response())
}

/// Build image API routes
pub fn render_routes(state: AppState) -> Router {
    Router::new()
        .route("/image_info/:case", get(image_info))
        .route("/original_slice/:case/:slice", get(original_slice))
        .route("/slice_with_overlay/:case/:slice", get(slice_with_overlay))
        .route("/segmentation_preview/:case/:file", get(segmentation_preview))
        .with_state(state)
}
