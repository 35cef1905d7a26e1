//! Loaded-volume cache with LRU eviction

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use super::service::VolumeReader;
use super::types::{Volume, VolumeError, VolumeInfo};

/// Volumes kept decoded for slice rendering
pub const DEFAULT_VOLUME_CACHE_SIZE: usize = 4;

/// Decoded volumes keyed by path, most recently used at the end.
///
/// Decoding happens outside the lock; two concurrent misses on the same path
/// may both decode, and the first insert wins.
pub struct VolumeCache {
    reader: Arc<dyn VolumeReader>,
    volumes: Mutex<IndexMap<PathBuf, Arc<Volume<f32>>>>,
    max_size: usize,
}

impl VolumeCache {
    pub fn new(reader: Arc<dyn VolumeReader>, max_size: usize) -> Self {
        Self {
            reader,
            volumes: Mutex::new(IndexMap::with_capacity(max_size)),
            max_size: max_size.max(1),
        }
    }

    pub fn reader(&self) -> &Arc<dyn VolumeReader> {
        &self.reader
    }

    /// Cached volume, or read it and cache it
    pub fn get_or_load(&self, path: &Path) -> Result<Arc<Volume<f32>>, VolumeError> {
        if let Some(volume) = self.touch(path) {
            return Ok(volume);
        }

        debug!("Loading volume: {:?}", path);
        let volume = Arc::new(self.reader.read(path)?);

        let mut volumes = self.volumes.lock();
        if let Some(existing) = volumes.get(path) {
            return Ok(Arc::clone(existing));
        }
        // Evict LRU if needed (first item is oldest)
        if volumes.len() >= self.max_size
            && let Some((lru_path, _)) = volumes.shift_remove_index(0)
        {
            debug!("Evicted volume from cache: {:?}", lru_path);
        }
        volumes.insert(path.to_path_buf(), Arc::clone(&volume));
        Ok(volume)
    }

    /// Shape and spacing, from the cache when possible, else header-only
    pub fn info(&self, path: &Path) -> Result<VolumeInfo, VolumeError> {
        if let Some(volume) = self.volumes.lock().get(path) {
            return Ok(volume.info());
        }
        self.reader.read_info(path)
    }

    pub fn evict(&self, path: &Path) {
        self.volumes.lock().shift_remove(path);
    }

    pub fn len(&self) -> usize {
        self.volumes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.lock().is_empty()
    }

    /// Look up and move to most-recent position
    fn touch(&self, path: &Path) -> Option<Arc<Volume<f32>>> {
        let mut volumes = self.volumes.lock();
        let index = volumes.get_index_of(path)?;
        let last = volumes.len() - 1;
        volumes.move_index(index, last);
        volumes.get_index(last).map(|(_, v)| Arc::clone(v))
    }
}
