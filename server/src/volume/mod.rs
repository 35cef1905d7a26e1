//! Volumetric image access
//!
//! This module provides:
//! - `VolumeReader` trait for abstracting scan formats
//! - `NiftiReader` for reading `.nii` / `.nii.gz` CT volumes
//! - `Volume`, the dense voxel grid shared by sessions and the renderer
//! - `VolumeCache` for keeping recently viewed volumes decoded

mod cache;
mod nifti;
mod service;
mod types;

pub use cache::{DEFAULT_VOLUME_CACHE_SIZE, VolumeCache};
pub use nifti::NiftiReader;
pub use service::VolumeReader;
pub use types::{LabelVolume, Volume, VolumeError, VolumeInfo};
