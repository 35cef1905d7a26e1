//! HTTP route handlers for segmentation jobs

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::types::{JobError, JobRecord};
use crate::case::validate_case_id;
use crate::server::{ApiErrorResponse, AppState};

/// Body for POST /api/run_docker
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub case_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub logs: Vec<String>,
}

/// POST /api/run_docker - Start segmentation for a case
pub async fn run_docker(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiErrorResponse> {
    let case = request.case_name;
    validate_case_id(&case)?;

    state.runner.start(&case).map_err(|e| {
        match &e {
            JobError::AlreadyRunning(_) => tracing::info!("Rejected duplicate start for {}", case),
            _ => tracing::warn!("Failed to start job for {}: {}", case, e),
        }
        ApiErrorResponse::from(e)
    })?;

    Ok(Json(RunResponse {
        success: true,
        message: format!("Processing started for {}.", case),
    }))
}

/// GET /api/status/:case - Current job record; unknown cases are not an error
pub async fn get_status(
    State(state): State<AppState>,
    Path(case): Path<String>,
) -> Json<JobRecord> {
    let record = state.jobs.get(&case);
    Json(JobRecord::clone(&record))
}

/// GET /api/logs/:case - Stored logs with a live tail while running
pub async fn get_logs(
    State(state): State<AppState>,
    Path(case): Path<String>,
) -> Json<LogsResponse> {
    Json(LogsResponse {
        logs: state.runner.logs(&case).await,
    })
}

/// Build job API routes
pub fn job_routes(state: AppState) -> Router {
    Router::new()
        .route("/run_docker", post(run_docker))
        .route("/status/:case", get(get_status))
        .route("/logs/:case", get(get_logs))
        .with_state(state)
}
