//! ctseg server library
//!
//! This module exports the server components for use in integration tests
//! and external tooling.

pub mod case;
pub mod config;
pub mod interactive;
pub mod job;
pub mod render;
pub mod server;
pub mod volume;

// Re-export commonly used types
pub use case::CaseStore;
pub use interactive::{InferenceEngine, SessionManager};
pub use job::{ContainerRuntime, DockerCli, JobRegistry, JobRunner};
pub use render::SliceRenderer;
pub use server::{ApiErrorResponse, AppState, api_routes};
pub use volume::{NiftiReader, Volume, VolumeReader};
