//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{Json, Router, routing::get};
use ctseg_server::config::Config;
use ctseg_server::interactive::SeedGrowFactory;
use ctseg_server::job::{ContainerHandle, ContainerProcess, ContainerSpec, JobError};
use ctseg_server::{AppState, ContainerRuntime, NiftiReader, api_routes};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Multipart boundary used by [`multipart_body`]
pub const BOUNDARY: &str = "ctsegtestboundary";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// How a mock container finishes
#[derive(Debug, Clone, Copy)]
pub enum Exit {
    Code(i32),
    Never,
}

/// Container runtime that replays canned output instead of calling docker
pub struct MockRuntime {
    lines: Vec<String>,
    exit: Exit,
}

impl MockRuntime {
    pub fn new(lines: &[&str], exit: Exit) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            exit,
        }
    }
}

struct MockProcess {
    handle: ContainerHandle,
    lines: VecDeque<String>,
    exit: Exit,
}

#[async_trait]
impl ContainerProcess for MockProcess {
    fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    async fn next_line(&mut self) -> Option<String> {
        match (self.lines.pop_front(), self.exit) {
            (Some(line), _) => Some(line),
            (None, Exit::Never) => std::future::pending().await,
            (None, Exit::Code(_)) => None,
        }
    }

    async fn wait(&mut self) -> Result<i32, JobError> {
        match self.exit {
            Exit::Code(code) => Ok(code),
            Exit::Never => std::future::pending().await,
        }
    }

    async fn terminate(&mut self) {}
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn accelerator_available(&self) -> bool {
        true
    }

    fn command_line(&self, spec: &ContainerSpec) -> String {
        format!("mock run {}", spec.name)
    }

    async fn launch(&self, spec: &ContainerSpec) -> Result<Box<dyn ContainerProcess>, JobError> {
        Ok(Box::new(MockProcess {
            handle: ContainerHandle::new(spec.name.clone()),
            lines: self.lines.iter().cloned().collect(),
            exit: self.exit,
        }))
    }

    async fn stop(&self, _handle: &ContainerHandle) -> Result<(), JobError> {
        Ok(())
    }

    async fn recent_logs(
        &self,
        _handle: &ContainerHandle,
        _tail: usize,
    ) -> Result<Vec<String>, JobError> {
        Ok(Vec::new())
    }
}

/// A fresh, empty directory under the system temp dir
pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}_{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Configuration rooted in a throwaway directory
pub fn test_config() -> Config {
    let root = temp_dir("ctseg_it");
    let model_dir = root.join("model");
    std::fs::create_dir_all(&model_dir).unwrap();

    let mut config = Config::default();
    config.storage.upload_dir = root.join("inputs");
    config.storage.output_dir = root.join("outputs");
    config.storage.preview_dir = root.join("previews");
    config.interactive.model_dir = model_dir;
    config.job.platform = None;
    config
}

/// Create a test application router with state
pub fn create_test_app_with_state(runtime: MockRuntime) -> (Router, AppState) {
    let config = test_config();
    let app_state = AppState::new(
        &config,
        Arc::new(runtime),
        Arc::new(SeedGrowFactory::new()),
        Arc::new(NiftiReader::new()),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes(app_state.clone()))
        .layer(cors);

    (app, app_state)
}

/// Create a test application whose containers exit cleanly
pub fn create_test_app() -> Router {
    create_test_app_with_state(MockRuntime::new(&[], Exit::Code(0))).0
}

/// Gzipped NIfTI-1 volume of little-endian i16 voxels
///
/// Voxel `(x, y, z)` holds `value(x, y, z)`.
pub fn nifti_gz(shape: [usize; 3], value: impl Fn(usize, usize, usize) -> i16) -> Vec<u8> {
    let mut raw = vec![0u8; 352];
    raw[0..4].copy_from_slice(&348i32.to_le_bytes());
    raw[40..42].copy_from_slice(&3i16.to_le_bytes());
    for (i, d) in shape.iter().enumerate() {
        let offset = 42 + i * 2;
        raw[offset..offset + 2].copy_from_slice(&(*d as i16).to_le_bytes());
    }
    raw[70..72].copy_from_slice(&4i16.to_le_bytes());
    raw[72..74].copy_from_slice(&16i16.to_le_bytes());
    for (offset, v) in [(80, 0.7f32), (84, 0.7), (88, 2.0), (108, 352.0), (112, 1.0)] {
        raw[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }
    raw[344..348].copy_from_slice(b"n+1\0");

    for z in 0..shape[2] {
        for y in 0..shape[1] {
            for x in 0..shape[0] {
                raw.extend_from_slice(&value(x, y, z).to_le_bytes());
            }
        }
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&raw).unwrap();
    encoder.finish().unwrap()
}

/// 8x8x4 phantom: air everywhere except a soft-tissue block at x,y in 2..6
pub fn phantom_scan() -> Vec<u8> {
    nifti_gz([8, 8, 4], |x, y, _| {
        if (2..6).contains(&x) && (2..6).contains(&y) {
            40
        } else {
            -1000
        }
    })
}

/// A single-file multipart form under the `file` field
pub fn multipart_body(file_name: &str, contents: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Content-Type header value matching [`multipart_body`]
pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}
