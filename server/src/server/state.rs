//! Shared application state

use std::path::PathBuf;
use std::sync::Arc;

use crate::case::CaseStore;
use crate::config::Config;
use crate::interactive::{EngineFactory, SessionManager, SessionManagerConfig};
use crate::job::{ContainerRuntime, JobRegistry, JobRunner};
use crate::render::{SlicePreviewGenerator, SliceRenderer};
use crate::volume::{DEFAULT_VOLUME_CACHE_SIZE, VolumeCache, VolumeReader};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cases: CaseStore,
    pub jobs: Arc<JobRegistry>,
    pub runner: Arc<JobRunner>,
    pub sessions: Arc<SessionManager>,
    pub volumes: Arc<VolumeCache>,
    pub renderer: SliceRenderer,
    pub preview_dir: PathBuf,
    pub max_upload_size: usize,
}

/// Counts reported by the gauge task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppStats {
    pub interactive_sessions: usize,
    pub tracked_jobs: usize,
    pub cached_volumes: usize,
}

impl AppState {
    /// Wire every component from the configuration and the pluggable
    /// runtime, engine and reader
    pub fn new(
        config: &Config,
        runtime: Arc<dyn ContainerRuntime>,
        engines: Arc<dyn EngineFactory>,
        reader: Arc<dyn VolumeReader>,
    ) -> Self {
        let storage = &config.storage;
        let cases = CaseStore::new(&storage.upload_dir, &storage.output_dir);
        let jobs = Arc::new(JobRegistry::new());

        let preview = SlicePreviewGenerator::new(
            Arc::clone(&reader),
            cases.clone(),
            storage.preview_dir.clone(),
        );
        let runner = JobRunner::new(
            Arc::clone(&jobs),
            runtime,
            cases.clone(),
            config.job.clone(),
        )
        .with_preview(Arc::new(preview));

        let sessions = SessionManager::new(
            Arc::clone(&reader),
            engines,
            cases.clone(),
            SessionManagerConfig {
                model_dir: config.interactive.model_dir.clone(),
                max_sessions: config.interactive.max_sessions,
            },
        );

        Self {
            cases,
            jobs,
            runner: Arc::new(runner),
            sessions: Arc::new(sessions),
            volumes: Arc::new(VolumeCache::new(reader, DEFAULT_VOLUME_CACHE_SIZE)),
            renderer: SliceRenderer::new(),
            preview_dir: storage.preview_dir.clone(),
            max_upload_size: storage.max_upload_size,
        }
    }

    pub fn stats(&self) -> AppStats {
        AppStats {
            interactive_sessions: self.sessions.len(),
            tracked_jobs: self.jobs.len(),
            cached_volumes: self.volumes.len(),
        }
    }
}
