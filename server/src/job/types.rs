//! Job status records and error definitions

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Most recent output lines kept per job
pub const MAX_LOG_LINES: usize = 50;

/// Errors that can occur while starting or running a segmentation job
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Case not found: {0}")]
    NotFound(String),

    #[error("Processing already started or completed for case {0}")]
    AlreadyRunning(String),

    #[error("Processing timed out after {} minutes", .0.as_secs() / 60)]
    Timeout(Duration),

    #[error("Docker execution failed with return code: {0}")]
    ProcessFailure(i32),

    #[error("Failed to launch container: {0}")]
    Spawn(String),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl JobError {
    /// Terminal `message` recorded for a job that ended with this error
    pub fn failure_message(&self) -> String {
        match self {
            JobError::Timeout(_) | JobError::ProcessFailure(_) => self.to_string(),
            other => format!("Error during processing: {}", other),
        }
    }
}

/// Runtime-assigned identity of a launched container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a case's segmentation job.
///
/// Moves forward only: `uploaded -> processing -> running -> completed | error`,
/// or straight from `processing` to `error`. `Unknown` is never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Unknown,
    Uploaded,
    Processing,
    Running {
        #[serde(skip_serializing_if = "Option::is_none")]
        container_id: Option<ContainerHandle>,
    },
    Completed {
        output_path: PathBuf,
    },
    Error,
}

impl JobStatus {
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Unknown => "unknown",
            JobStatus::Uploaded => "uploaded",
            JobStatus::Processing => "processing",
            JobStatus::Running { .. } => "running",
            JobStatus::Completed { .. } => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Whether a new job must be refused while in this state
    pub fn blocks_start(&self) -> bool {
        matches!(
            self,
            JobStatus::Processing | JobStatus::Running { .. } | JobStatus::Completed { .. }
        )
    }

    pub fn container(&self) -> Option<&ContainerHandle> {
        match self {
            JobStatus::Running { container_id } => container_id.as_ref(),
            _ => None,
        }
    }
}

/// Bounded FIFO of job output lines
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LogBuffer(VecDeque<String>);

impl LogBuffer {
    pub fn new() -> Self {
        Self(VecDeque::with_capacity(MAX_LOG_LINES))
    }

    /// Append a line, evicting the oldest beyond the bound
    pub fn push(&mut self, line: impl Into<String>) {
        if self.0.len() == MAX_LOG_LINES {
            self.0.pop_front();
        }
        self.0.push_back(line.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

/// One case's job state as seen by status polling
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    #[serde(flatten)]
    pub status: JobStatus,
    pub message: String,
    pub logs: LogBuffer,
}

impl JobRecord {
    pub fn new(status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            logs: LogBuffer::new(),
        }
    }

    /// Sentinel returned for cases the registry has never seen
    pub fn unknown() -> Self {
        Self::new(JobStatus::Unknown, "Case not found")
    }

    pub fn uploaded() -> Self {
        Self::new(JobStatus::Uploaded, "File uploaded successfully")
    }

    pub fn processing() -> Self {
        Self::new(JobStatus::Processing, "Processing started...")
    }

    /// Replace status and message, carrying the logs over
    pub fn transition(&self, status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            logs: self.logs.clone(),
        }
    }
}
