//! ContainerRuntime trait definition

use std::path::PathBuf;

use async_trait::async_trait;

use super::types::{ContainerHandle, JobError};

/// A host directory bind-mounted into the container
#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
}

/// Everything needed to launch one segmentation container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Deterministic container name, used as the handle
    pub name: String,
    pub image: String,
    /// Shell command run inside the container
    pub command: String,
    pub mounts: Vec<Mount>,
    pub memory_limit: String,
    /// Accelerator device request, `None` for CPU-only
    pub gpu: Option<String>,
    pub platform: Option<String>,
}

/// Trait for container runtimes (the docker CLI, or mocks in tests)
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether an accelerator can be requested for new containers
    async fn accelerator_available(&self) -> bool;

    /// Human-readable command line for the job log
    fn command_line(&self, spec: &ContainerSpec) -> String;

    /// Start a container and stream its combined output
    async fn launch(&self, spec: &ContainerSpec) -> Result<Box<dyn ContainerProcess>, JobError>;

    /// Stop a container by handle
    async fn stop(&self, handle: &ContainerHandle) -> Result<(), JobError>;

    /// Last `tail` output lines of a container
    async fn recent_logs(
        &self,
        handle: &ContainerHandle,
        tail: usize,
    ) -> Result<Vec<String>, JobError>;
}

/// A launched container process
#[async_trait]
pub trait ContainerProcess: Send {
    fn handle(&self) -> &ContainerHandle;

    /// Next line of combined stdout/stderr, `None` once both streams close
    async fn next_line(&mut self) -> Option<String>;

    /// Wait for exit; signals map to `-1`
    async fn wait(&mut self) -> Result<i32, JobError>;

    /// Kill the local process; the container itself is stopped via the runtime
    async fn terminate(&mut self);
}
