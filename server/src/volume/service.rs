//! VolumeReader trait definition

use std::path::Path;

use super::types::{Volume, VolumeError, VolumeInfo};

/// Trait for volumetric image readers
pub trait VolumeReader: Send + Sync {
    /// Load a full volume as `f32` intensities
    fn read(&self, path: &Path) -> Result<Volume<f32>, VolumeError>;

    /// Read shape and spacing only
    fn read_info(&self, path: &Path) -> Result<VolumeInfo, VolumeError> {
        self.read(path).map(|v| v.info())
    }
}
