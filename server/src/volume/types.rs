//! Volume types and error definitions

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur when reading volumes
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Volume not found: {0}")]
    NotFound(String),

    #[error("Invalid volume header: {0}")]
    InvalidHeader(String),

    #[error("Unsupported voxel datatype: {0}")]
    UnsupportedDatatype(i16),

    #[error("Voxel data truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Shape {shape:?} does not match {len} voxels")]
    ShapeMismatch { shape: [usize; 3], len: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Shape and spacing of a volume, without voxel data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeInfo {
    /// Voxel counts along (x, y, z)
    pub shape: [usize; 3],
    /// Voxel spacing along (x, y, z), in millimetres
    pub spacing: [f32; 3],
}

impl VolumeInfo {
    /// Highest valid axial slice index
    pub fn max_slice(&self) -> usize {
        self.shape[2].saturating_sub(1)
    }
}

/// Dense 3-D voxel grid stored x-fastest (the NIfTI on-disk order).
///
/// Axial slice `z` is the contiguous run `data[z*nx*ny .. (z+1)*nx*ny]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    shape: [usize; 3],
    spacing: [f32; 3],
    data: Vec<T>,
}

/// Label buffer: one byte per voxel
pub type LabelVolume = Volume<u8>;

impl<T: Copy> Volume<T> {
    /// Wrap voxel data, checking that it fills the shape exactly
    pub fn new(shape: [usize; 3], spacing: [f32; 3], data: Vec<T>) -> Result<Self, VolumeError> {
        let expected = shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(VolumeError::ShapeMismatch {
                shape,
                len: data.len(),
            });
        }
        Ok(Self {
            shape,
            spacing,
            data,
        })
    }

    /// A volume with every voxel set to `value`
    pub fn filled(shape: [usize; 3], spacing: [f32; 3], value: T) -> Self {
        let len = shape.iter().product::<usize>();
        Self {
            shape,
            spacing,
            data: vec![value; len],
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn spacing(&self) -> [f32; 3] {
        self.spacing
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            shape: self.shape,
            spacing: self.spacing,
        }
    }

    /// Number of axial slices
    pub fn depth(&self) -> usize {
        self.shape[2]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        x < self.shape[0] && y < self.shape[1] && z < self.shape[2]
    }

    /// Linear index of a voxel; caller guarantees bounds
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.shape[0] * (y + self.shape[1] * z)
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<T> {
        if self.contains(x, y, z) {
            Some(self.data[self.index(x, y, z)])
        } else {
            None
        }
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) -> bool {
        if !self.contains(x, y, z) {
            return false;
        }
        let idx = self.index(x, y, z);
        self.data[idx] = value;
        true
    }

    /// Axial slice `z` as an (nx * ny) row-major run, rows along y
    pub fn slice(&self, z: usize) -> Option<&[T]> {
        if z >= self.shape[2] {
            return None;
        }
        let plane = self.shape[0] * self.shape[1];
        Some(&self.data[z * plane..(z + 1) * plane])
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        let result = Volume::new([2, 2, 2], [1.0; 3], vec![0u8; 7]);
        assert!(matches!(
            result,
            Err(VolumeError::ShapeMismatch { len: 7, .. })
        ));
    }

    #[test]
    fn test_slice_is_contiguous_plane() {
        let data: Vec<u8> = (0..12).collect();
        let volume = Volume::new([2, 3, 2], [1.0; 3], data).unwrap();

        assert_eq!(volume.slice(0).unwrap(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(volume.slice(1).unwrap(), &[6, 7, 8, 9, 10, 11]);
        assert!(volume.slice(2).is_none());
        assert_eq!(volume.get(1, 2, 1), Some(11));
        assert_eq!(volume.get(2, 0, 0), None);
    }

    #[test]
    fn test_max_slice() {
        let info = VolumeInfo {
            shape: [4, 4, 100],
            spacing: [1.0; 3],
        };
        assert_eq!(info.max_slice(), 99);
    }
}
