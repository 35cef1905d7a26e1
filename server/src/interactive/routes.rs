//! HTTP route handlers for interactive refinement

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::manager::{AddPointOutcome, SessionError};
use super::session::{InteractionPoint, SegmentationStats};
use crate::case::{CaseError, validate_case_id};
use crate::server::{ApiErrorResponse, AppState};

fn default_positive() -> bool {
    true
}

/// Body for POST /api/interact_segment
#[derive(Debug, Deserialize)]
pub struct InteractRequest {
    pub case_name: String,
    pub x: i64,
    pub y: i64,
    pub z: i64,
    #[serde(default = "default_positive")]
    pub positive: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InteractResponse {
    pub success: bool,
    pub point: InteractionPoint,
    pub segmentation_stats: SegmentationStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub success: bool,
    pub message: String,
}

/// A point as drawn on one slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlicePoint {
    pub x: usize,
    pub y: usize,
    pub positive: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InteractionPointsResponse {
    pub success: bool,
    pub points: Vec<SlicePoint>,
}

fn out_of_bounds(request: &InteractRequest, shape: Option<[usize; 3]>) -> ApiErrorResponse {
    let message = match shape {
        Some(shape) => format!(
            "Point ({}, {}, {}) is outside the volume {:?}",
            request.x, request.y, request.z, shape
        ),
        None => format!(
            "Point ({}, {}, {}) has negative coordinates",
            request.x, request.y, request.z
        ),
    };
    ApiErrorResponse::new("out_of_bounds", message)
}

/// POST /api/interact_segment - Add a click to the case's session
pub async fn interact_segment(
    State(state): State<AppState>,
    Json(request): Json<InteractRequest>,
) -> Result<Json<InteractResponse>, ApiErrorResponse> {
    let case = request.case_name.clone();
    validate_case_id(&case)?;
    if !state.cases.exists(&case) {
        return Err(CaseError::NotFound(case).into());
    }

    let coords = [request.x, request.y, request.z].map(usize::try_from);
    let [Ok(x), Ok(y), Ok(z)] = coords else {
        return Err(out_of_bounds(&request, None));
    };
    let point = InteractionPoint {
        x,
        y,
        z,
        positive: request.positive,
    };

    let sessions = state.sessions.clone();
    let result = tokio::task::spawn_blocking(
        move || -> Result<Result<AddPointOutcome, [usize; 3]>, SessionError> {
            let session = sessions.get_or_create(&case)?;
            let volume = session.volume();
            if !volume.contains(x, y, z) {
                return Ok(Err(volume.shape()));
            }
            sessions.add_point(&case, point).map(Ok)
        },
    )
    .await
    .map_err(|e| ApiErrorResponse::new("internal_error", e.to_string()))?;

    let outcome = match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(shape)) => return Err(out_of_bounds(&request, Some(shape))),
        Err(e) => {
            tracing::warn!("Interaction failed for {}: {}", request.case_name, e);
            return Err(e.into());
        }
    };

    Ok(Json(InteractResponse {
        success: true,
        point: outcome.point,
        segmentation_stats: outcome.stats,
    }))
}

/// POST /api/clear_segmentation/:case - Reset the case's mask and points
pub async fn clear_segmentation(
    State(state): State<AppState>,
    Path(case): Path<String>,
) -> Result<Json<ClearResponse>, ApiErrorResponse> {
    validate_case_id(&case)?;
    let sessions = state.sessions.clone();
    tokio::task::spawn_blocking(move || sessions.clear(&case))
        .await
        .map_err(|e| ApiErrorResponse::new("internal_error", e.to_string()))??;

    Ok(Json(ClearResponse {
        success: true,
        message: "Segmentation cleared".to_string(),
    }))
}

/// GET /api/get_interaction_points/:case/:slice - Points drawn on one slice
pub async fn get_interaction_points(
    State(state): State<AppState>,
    Path((case, slice)): Path<(String, usize)>,
) -> Json<InteractionPointsResponse> {
    let points = state
        .sessions
        .points_for_slice(&case, slice)
        .into_iter()
        .map(|p| SlicePoint {
            x: p.x,
            y: p.y,
            positive: p.positive,
        })
        .collect();

    Json(InteractionPointsResponse {
        success: true,
        points,
    })
}

/// Build interactive API routes
pub fn interactive_routes(state: AppState) -> Router {
    Router::new()
        .route("/interact_segment", post(interact_segment))
        .route("/clear_segmentation/:case", post(clear_segmentation))
        .route(
            "/get_interaction_points/:case/:slice",
            get(get_interaction_points),
        )
        .with_state(state)
}
