//! Background segmentation job runner

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::JobRegistry;
use super::runtime::{ContainerProcess, ContainerRuntime, ContainerSpec, Mount};
use super::types::{ContainerHandle, JobError, JobRecord, JobStatus, MAX_LOG_LINES};
use crate::case::CaseStore;
use crate::config::JobConfig;
use crate::render::PreviewGenerator;

/// Lines fetched from a live container for the logs endpoint
const FRESH_LOG_TAIL: usize = 20;

/// Separator between stored and freshly fetched log lines
const FRESH_LOG_MARKER: &str = "--- Fresh Docker Logs ---";

/// Keyword -> message prefix, checked in order after `test len`
const PROGRESS_KEYWORDS: [(&str, &str); 4] = [
    ("loading", "Loading"),
    ("processing", "Processing"),
    ("segmenting", "Segmenting"),
    ("saving", "Saving results"),
];

/// Map a container output line to a progress message, if it looks like one
pub fn progress_message(line: &str) -> Option<String> {
    let lower = line.to_lowercase();
    if lower.contains("test len") {
        return Some("Loading data and initializing model...".to_string());
    }
    PROGRESS_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, prefix)| format!("{}: {}", prefix, line))
}

/// Runs one segmentation container per case on a detached task
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    cases: CaseStore,
    config: JobConfig,
    preview: Option<Arc<dyn PreviewGenerator>>,
}

impl JobRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        cases: CaseStore,
        config: JobConfig,
    ) -> Self {
        Self {
            registry,
            runtime,
            cases,
            config,
            preview: None,
        }
    }

    /// Generate previews after each successful job
    pub fn with_preview(mut self, preview: Arc<dyn PreviewGenerator>) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Mark the case `processing` and dispatch its job.
    ///
    /// Returns as soon as the job is dispatched. The handle resolves once the
    /// job has reached a terminal state.
    pub fn start(self: &Arc<Self>, case: &str) -> Result<JoinHandle<()>, JobError> {
        if !self.cases.exists(case) {
            return Err(JobError::NotFound(case.to_string()));
        }
        if let Err(e) = self.registry.try_begin(case) {
            counter!("ctseg_jobs_rejected_total").increment(1);
            return Err(e);
        }
        counter!("ctseg_jobs_started_total").increment(1);
        info!("Processing started for {}", case);

        let runner = Arc::clone(self);
        let case = case.to_string();
        Ok(tokio::spawn(async move { runner.supervise(case).await }))
    }

    /// Stored logs plus, while a container is live, a fresh tail from the runtime
    pub async fn logs(&self, case: &str) -> Vec<String> {
        let record = self.registry.get(case);
        let mut logs = record.logs.to_vec();

        if let Some(handle) = record.status.container() {
            match self.runtime.recent_logs(handle, FRESH_LOG_TAIL).await {
                Ok(fresh) => {
                    logs.push(FRESH_LOG_MARKER.to_string());
                    logs.extend(fresh);
                    let excess = logs.len().saturating_sub(MAX_LOG_LINES);
                    logs.drain(..excess);
                }
                Err(e) => debug!("Could not fetch fresh logs for {}: {}", handle, e),
            }
        }
        logs
    }

    /// Forget a deleted case, stopping its container if one is live
    pub async fn purge(&self, case: &str) {
        let Some(record) = self.registry.remove(case) else {
            return;
        };
        if let Some(handle) = record.status.container() {
            info!("Stopping {} for deleted case {}", handle, case);
            if let Err(e) = self.runtime.stop(handle).await {
                warn!("Failed to stop {} for deleted case {}: {}", handle, case, e);
            }
        }
    }

    /// Run the job on its own task so a panic still ends in a terminal record
    async fn supervise(self: Arc<Self>, case: String) {
        let started = Instant::now();
        let worker = {
            let runner = Arc::clone(&self);
            let case = case.clone();
            tokio::spawn(async move { runner.run(&case).await })
        };

        let outcome = match worker.await {
            Ok(Ok(())) => "completed",
            Ok(Err(e)) => {
                warn!("Segmentation failed for {}: {}", case, e);
                self.fail(&case, e.failure_message());
                match e {
                    JobError::Timeout(_) => "timeout",
                    _ => "error",
                }
            }
            Err(e) => {
                error!("Segmentation task for {} aborted: {}", case, e);
                self.fail(
                    &case,
                    format!("Error during processing: job task aborted ({})", e),
                );
                "panic"
            }
        };

        counter!("ctseg_jobs_finished_total", "outcome" => outcome).increment(1);
        histogram!("ctseg_job_duration_seconds").record(started.elapsed());
    }

    fn fail(&self, case: &str, message: String) {
        self.registry
            .update(case, |r| *r = r.transition(JobStatus::Error, message));
    }

    async fn run(&self, case: &str) -> Result<(), JobError> {
        let accelerated = self.runtime.accelerator_available().await;
        if !accelerated {
            warn!("GPU not available, running {} on CPU", case);
        }
        let timeout = self.effective_timeout(accelerated);

        let spec = self.container_spec(case, accelerated)?;
        let command = self.runtime.command_line(&spec);
        info!("Running segmentation for {}: {}", case, command);

        let mut record = JobRecord::new(
            JobStatus::Running { container_id: None },
            "Starting segmentation...",
        );
        record.logs.push(format!("Command: {}", command));
        let mut claimed = false;
        self.registry.update(case, |r| {
            *r = record;
            claimed = true;
        });
        if !claimed {
            info!("{} was deleted before its container started", case);
            return Err(JobError::NotFound(case.to_string()));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut process = self.runtime.launch(&spec).await?;
        let handle = process.handle().clone();
        self.registry.update(case, |r| {
            r.status = JobStatus::Running {
                container_id: Some(handle.clone()),
            };
            r.logs.push(format!("Container started: {}", handle));
        });

        loop {
            let next = tokio::time::timeout_at(deadline, process.next_line()).await;
            match next {
                Ok(Some(line)) => self.record_line(case, &line),
                Ok(None) => break,
                Err(_) => return Err(self.abort(process, &handle, timeout).await),
            }
        }

        let exited = tokio::time::timeout_at(deadline, process.wait()).await;
        let code = match exited {
            Ok(code) => code?,
            Err(_) => return Err(self.abort(process, &handle, timeout).await),
        };
        if code != 0 {
            return Err(JobError::ProcessFailure(code));
        }

        let output_path = self.cases.output_dir(case);
        self.registry.update(case, |r| {
            *r = r.transition(
                JobStatus::Completed { output_path },
                "Segmentation completed successfully!",
            )
        });
        info!("Segmentation completed for {}", case);

        self.generate_previews(case).await;
        Ok(())
    }

    /// CPU-only and emulated runs get twice the base timeout
    fn effective_timeout(&self, accelerated: bool) -> Duration {
        if !accelerated || self.config.platform.is_some() {
            self.config.timeout * 2
        } else {
            self.config.timeout
        }
    }

    fn container_spec(&self, case: &str, accelerated: bool) -> Result<ContainerSpec, JobError> {
        let input_dir = std::path::absolute(self.cases.input_dir(case))?;
        let output_dir = self.cases.output_dir(case);
        std::fs::create_dir_all(&output_dir)?;
        let output_dir = std::path::absolute(output_dir)?;

        Ok(ContainerSpec {
            name: format!("ctseg-{}", case),
            image: self.config.image.clone(),
            command: self.config.command.clone(),
            mounts: vec![
                Mount {
                    host: input_dir,
                    container: format!("/workspace/inputs/{}", case),
                },
                Mount {
                    host: output_dir,
                    container: format!("/workspace/outputs/{}", case),
                },
            ],
            memory_limit: self.config.memory_limit.clone(),
            gpu: accelerated.then(|| self.config.gpu_device.clone()),
            platform: self.config.platform.clone(),
        })
    }

    fn record_line(&self, case: &str, raw: &str) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }
        debug!("[{}] {}", case, line);
        let message = progress_message(line);
        self.registry.update(case, |r| {
            r.logs.push(line);
            if let Some(message) = message {
                r.message = message;
            }
        });
    }

    /// Kill the client process and stop the container once
    async fn abort(
        &self,
        mut process: Box<dyn ContainerProcess>,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> JobError {
        process.terminate().await;
        if let Err(e) = self.runtime.stop(handle).await {
            warn!("Failed to stop container {}: {}", handle, e);
        }
        JobError::Timeout(timeout)
    }

    async fn generate_previews(&self, case: &str) {
        let Some(preview) = self.preview.clone() else {
            return;
        };
        let case = case.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let generated: Result<Vec<PathBuf>, _> = preview.generate(&case);
            (case, generated)
        })
        .await;

        match result {
            Ok((case, Ok(paths))) => info!("Generated {} preview images for {}", paths.len(), case),
            Ok((case, Err(e))) => warn!("Preview generation failed for {}: {}", case, e),
            Err(e) => warn!("Preview generation task failed: {}", e),
        }
    }
}
