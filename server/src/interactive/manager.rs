//! Interactive session cache with LRU eviction

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use super::engine::{EngineError, EngineFactory};
use super::session::{InteractionPoint, InteractiveSession, SegmentationStats};
use crate::case::CaseStore;
use crate::volume::{Volume, VolumeReader};

/// Errors that can occur when working with interactive sessions
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No active session found for case {0}")]
    NotFound(String),

    #[error("Failed to initialize interactive session: {0}")]
    SessionInit(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Settings for the session cache
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Directory handed to the engine factory
    pub model_dir: PathBuf,
    /// Maximum cached sessions, 0 for unbounded
    pub max_sessions: usize,
}

/// Result of one interaction
#[derive(Debug, Clone, PartialEq)]
pub struct AddPointOutcome {
    pub point: InteractionPoint,
    pub stats: SegmentationStats,
}

/// One interactive session per case, created lazily.
///
/// The cache lock is only held to find or build a session. Engine work runs
/// under the session's own lock, so the two are never nested.
pub struct SessionManager {
    sessions: Mutex<IndexMap<String, Arc<InteractiveSession>>>,
    reader: Arc<dyn VolumeReader>,
    engines: Arc<dyn EngineFactory>,
    cases: CaseStore,
    config: SessionManagerConfig,
}

impl SessionManager {
    pub fn new(
        reader: Arc<dyn VolumeReader>,
        engines: Arc<dyn EngineFactory>,
        cases: CaseStore,
        config: SessionManagerConfig,
    ) -> Self {
        Self {
            sessions: Mutex::new(IndexMap::new()),
            reader,
            engines,
            cases,
            config,
        }
    }

    /// Cached session for `case`, or a freshly initialized one.
    ///
    /// Creation happens under the cache lock so a volume is loaded at most
    /// once per session.
    pub fn get_or_create(&self, case: &str) -> Result<Arc<InteractiveSession>, SessionError> {
        let mut sessions = self.sessions.lock();

        if let Some(index) = sessions.get_index_of(case) {
            let last = sessions.len() - 1;
            sessions.move_index(index, last);
            if let Some((_, session)) = sessions.get_index(last) {
                return Ok(Arc::clone(session));
            }
        }

        let session = Arc::new(self.create(case)?);

        if self.config.max_sessions > 0
            && sessions.len() >= self.config.max_sessions
            && let Some((lru_case, _)) = sessions.shift_remove_index(0)
        {
            info!("Evicted interactive session for {}", lru_case);
            counter!("ctseg_interactive_sessions_evicted_total").increment(1);
        }

        sessions.insert(case.to_string(), Arc::clone(&session));
        counter!("ctseg_interactive_sessions_created_total").increment(1);
        Ok(session)
    }

    fn create(&self, case: &str) -> Result<InteractiveSession, SessionError> {
        let start = Instant::now();
        let path = self.cases.input_volume_path(case);
        debug!("Creating interactive session for {} from {:?}", case, path);

        let volume = self
            .reader
            .read(&path)
            .map_err(|e| SessionError::SessionInit(format!("failed to load volume: {}", e)))?;
        let volume = Arc::new(volume);

        let init = |e: EngineError| SessionError::SessionInit(e.to_string());
        let mut engine = self.engines.initialize(&self.config.model_dir).map_err(init)?;
        engine.set_image(Arc::clone(&volume)).map_err(init)?;
        engine
            .set_target_buffer(Volume::filled(volume.shape(), volume.spacing(), 0u8))
            .map_err(init)?;

        histogram!("ctseg_interactive_session_init_duration_seconds").record(start.elapsed());
        info!(
            "Interactive session ready for {}: shape={:?}",
            case,
            volume.shape()
        );
        Ok(InteractiveSession::new(case, volume, engine))
    }

    /// Cached session without creating one
    pub fn get(&self, case: &str) -> Option<Arc<InteractiveSession>> {
        self.sessions.lock().get(case).map(Arc::clone)
    }

    /// Apply a click to the case's session, creating it if needed
    pub fn add_point(
        &self,
        case: &str,
        point: InteractionPoint,
    ) -> Result<AddPointOutcome, SessionError> {
        let session = self.get_or_create(case)?;
        let stats = session.add_point(point)?;

        let polarity = if point.positive { "positive" } else { "negative" };
        counter!("ctseg_interactive_points_total", "polarity" => polarity).increment(1);
        debug!(
            "Point {:?} on {}: {} labelled voxels",
            point.coords(),
            case,
            stats.total_voxels
        );
        Ok(AddPointOutcome { point, stats })
    }

    /// Reset a session's mask and points in place
    pub fn clear(&self, case: &str) -> Result<(), SessionError> {
        let session = self
            .get(case)
            .ok_or_else(|| SessionError::NotFound(case.to_string()))?;
        session.clear()?;
        Ok(())
    }

    /// Points on slice `z`; empty when the case has no session
    pub fn points_for_slice(&self, case: &str, z: usize) -> Vec<InteractionPoint> {
        self.get(case)
            .map(|s| s.points_for_slice(z))
            .unwrap_or_default()
    }

    pub fn remove(&self, case: &str) -> bool {
        let removed = self.sessions.lock().shift_remove(case).is_some();
        if removed {
            info!("Removed interactive session for {}", case);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interactive::engine::InferenceEngine;
    use crate::interactive::seed_grow::SeedGrowEngine;
    use crate::volume::VolumeError;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReader {
        reads: AtomicUsize,
    }

    impl VolumeReader for CountingReader {
        fn read(&self, path: &Path) -> Result<Volume<f32>, VolumeError> {
            if path.to_string_lossy().contains("missing") {
                return Err(VolumeError::NotFound(path.display().to_string()));
            }
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Volume::filled([8, 8, 4], [1.0; 3], 40.0))
        }
    }

    struct TestFactory {
        inits: AtomicUsize,
    }

    impl EngineFactory for TestFactory {
        fn initialize(&self, model_dir: &Path) -> Result<Box<dyn InferenceEngine>, EngineError> {
            if model_dir.ends_with("absent") {
                return Err(EngineError::ModelUnavailable("absent".to_string()));
            }
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SeedGrowEngine::default()))
        }
    }

    fn manager(max_sessions: usize) -> (SessionManager, Arc<CountingReader>, Arc<TestFactory>) {
        manager_with_model(max_sessions, "models/test")
    }

    fn manager_with_model(
        max_sessions: usize,
        model_dir: &str,
    ) -> (SessionManager, Arc<CountingReader>, Arc<TestFactory>) {
        let reader = Arc::new(CountingReader {
            reads: AtomicUsize::new(0),
        });
        let factory = Arc::new(TestFactory {
            inits: AtomicUsize::new(0),
        });
        let manager = SessionManager::new(
            Arc::clone(&reader) as Arc<dyn VolumeReader>,
            Arc::clone(&factory) as Arc<dyn EngineFactory>,
            CaseStore::new("inputs", "outputs"),
            SessionManagerConfig {
                model_dir: PathBuf::from(model_dir),
                max_sessions,
            },
        );
        (manager, reader, factory)
    }

    fn click(x: usize, y: usize, z: usize, positive: bool) -> InteractionPoint {
        InteractionPoint { x, y, z, positive }
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (manager, reader, factory) = manager(8);
        let first = manager.get_or_create("casename00001").unwrap();
        let second = manager.get_or_create("casename00001").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
        assert_eq!(factory.inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_preserves_session_identity() {
        let (manager, reader, _factory) = manager(8);
        let outcome = manager.add_point("c1", click(1, 1, 1, true)).unwrap();
        assert!(outcome.stats.total_voxels > 0);
        let before = manager.get("c1").unwrap();

        manager.clear("c1").unwrap();
        let after = manager.get("c1").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(manager.points_for_slice("c1", 1).is_empty());

        let outcome = manager.add_point("c1", click(2, 2, 2, true)).unwrap();
        assert_eq!(outcome.stats.unique_values, vec![1]);
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_without_session_is_not_found() {
        let (manager, _reader, _factory) = manager(8);
        assert!(matches!(
            manager.clear("c9"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn test_points_for_slice_without_session_is_empty() {
        let (manager, _reader, _factory) = manager(8);
        assert!(manager.points_for_slice("c1", 0).is_empty());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let (manager, reader, _factory) = manager(2);
        manager.get_or_create("a").unwrap();
        manager.get_or_create("b").unwrap();
        manager.get_or_create("a").unwrap();
        manager.get_or_create("c").unwrap();

        assert_eq!(manager.len(), 2);
        assert!(manager.get("b").is_none());
        assert!(manager.get("a").is_some());
        assert_eq!(reader.reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_bound_is_unbounded() {
        let (manager, _reader, _factory) = manager(0);
        for i in 0..12 {
            manager.get_or_create(&format!("c{}", i)).unwrap();
        }
        assert_eq!(manager.len(), 12);
    }

    #[test]
    fn test_missing_volume_is_init_error() {
        let (manager, _reader, _factory) = manager(8);
        let result = manager.get_or_create("missing");
        assert!(matches!(result, Err(SessionError::SessionInit(_))));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_missing_model_is_init_error() {
        let (manager, reader, factory) = manager_with_model(8, "models/absent");

        let result = manager.add_point("c1", click(1, 1, 1, true));
        match result {
            Err(SessionError::SessionInit(message)) => assert!(message.contains("absent")),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(manager.is_empty());
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
        assert_eq!(factory.inits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_clicks_on_one_case_are_all_recorded() {
        let (manager, reader, factory) = manager(8);
        let threads = 8;
        let clicks_per_thread = 10;

        std::thread::scope(|scope| {
            for t in 0..threads {
                let manager = &manager;
                scope.spawn(move || {
                    for i in 0..clicks_per_thread {
                        let point = click(i % 8, t % 8, (t + i) % 4, i % 3 != 0);
                        manager.add_point("c1", point).unwrap();
                    }
                });
            }
        });

        let session = manager.get("c1").unwrap();
        assert_eq!(session.points().len(), threads * clicks_per_thread);
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
        assert_eq!(factory.inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_out_of_bounds_click_is_engine_error() {
        let (manager, _reader, _factory) = manager(8);
        let result = manager.add_point("c1", click(8, 0, 0, true));
        assert!(matches!(
            result,
            Err(SessionError::Engine(EngineError::OutOfBounds { .. }))
        ));
        assert!(manager.get("c1").unwrap().points().is_empty());
    }

    #[test]
    fn test_remove_drops_session() {
        let (manager, _reader, _factory) = manager(8);
        manager.get_or_create("c1").unwrap();
        assert!(manager.remove("c1"));
        assert!(!manager.remove("c1"));
        assert!(manager.get("c1").is_none());
    }
}
