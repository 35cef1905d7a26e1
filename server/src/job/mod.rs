//! Batch segmentation jobs
//!
//! This module provides:
//! - `JobRegistry`, the in-memory case -> status record store
//! - `JobRunner`, which drives one container per case on a background task
//! - `ContainerRuntime` trait with the `DockerCli` implementation
//! - HTTP routes for starting jobs and polling their status and logs

mod docker;
mod registry;
pub mod routes;
mod runner;
mod runtime;
mod types;

pub use docker::DockerCli;
pub use registry::JobRegistry;
pub use routes::job_routes;
pub use runner::{JobRunner, progress_message};
pub use runtime::{ContainerProcess, ContainerRuntime, ContainerSpec, Mount};
pub use types::{ContainerHandle, JobError, JobRecord, JobStatus, LogBuffer, MAX_LOG_LINES};
