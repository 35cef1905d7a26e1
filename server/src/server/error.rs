//! Error response shared by every API route

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::case::CaseError;
use crate::interactive::{EngineError, SessionError};
use crate::job::JobError;
use crate::render::RenderError;
use crate::volume::VolumeError;

/// Error body: `{"error": "...", "code": "..."}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiErrorResponse {
    pub fn new(code: &str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "already_running" => StatusCode::CONFLICT,
            "out_of_bounds" => StatusCode::BAD_REQUEST,
            code if code.starts_with("invalid_") => StatusCode::BAD_REQUEST,
            "session_init" => StatusCode::SERVICE_UNAVAILABLE,
            "engine_error" => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<CaseError> for ApiErrorResponse {
    fn from(e: CaseError) -> Self {
        let code = match &e {
            CaseError::NotFound(_) => "not_found",
            CaseError::InvalidCaseId(_) => "invalid_case_id",
            CaseError::InvalidUpload(_) => "invalid_upload",
            CaseError::IoError(_) => "io_error",
        };
        Self::new(code, e.to_string())
    }
}

impl From<JobError> for ApiErrorResponse {
    fn from(e: JobError) -> Self {
        let code = match &e {
            JobError::NotFound(_) => "not_found",
            JobError::AlreadyRunning(_) => "already_running",
            JobError::Timeout(_) => "job_timeout",
            JobError::ProcessFailure(_) => "job_process_failure",
            JobError::Spawn(_) | JobError::Runtime(_) => "runtime_error",
            JobError::IoError(_) => "io_error",
        };
        Self::new(code, e.to_string())
    }
}

impl From<VolumeError> for ApiErrorResponse {
    fn from(e: VolumeError) -> Self {
        let code = match &e {
            VolumeError::NotFound(_) => "not_found",
            VolumeError::IoError(_) => "io_error",
            _ => "volume_error",
        };
        Self::new(code, e.to_string())
    }
}

impl From<EngineError> for ApiErrorResponse {
    fn from(e: EngineError) -> Self {
        let code = match &e {
            EngineError::OutOfBounds { .. } => "out_of_bounds",
            _ => "engine_error",
        };
        Self::new(code, e.to_string())
    }
}

impl From<SessionError> for ApiErrorResponse {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(_) => Self::new("not_found", e.to_string()),
            SessionError::SessionInit(_) => Self::new("session_init", e.to_string()),
            SessionError::Engine(inner) => Self::from(inner),
        }
    }
}

impl From<RenderError> for ApiErrorResponse {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Volume(inner) => Self::from(inner),
            other => Self::new("render_error", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            ("not_found", StatusCode::NOT_FOUND),
            ("already_running", StatusCode::CONFLICT),
            ("invalid_case_id", StatusCode::BAD_REQUEST),
            ("out_of_bounds", StatusCode::BAD_REQUEST),
            ("session_init", StatusCode::SERVICE_UNAVAILABLE),
            ("engine_error", StatusCode::UNPROCESSABLE_ENTITY),
            ("render_error", StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (code, status) in cases {
            assert_eq!(ApiErrorResponse::new(code, "x").status(), status, "{}", code);
        }
    }

    #[test]
    fn test_job_error_codes() {
        let response = ApiErrorResponse::from(JobError::AlreadyRunning("c1".to_string()));
        assert_eq!(response.code, "already_running");
        assert!(response.error.contains("c1"));
    }

    #[test]
    fn test_session_engine_error_is_unwrapped() {
        let response = ApiErrorResponse::from(SessionError::Engine(EngineError::OutOfBounds {
            point: [9, 0, 0],
            shape: [4, 4, 4],
        }));
        assert_eq!(response.code, "out_of_bounds");
    }
}
