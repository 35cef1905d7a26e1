//! NIfTI-1 volume reader (`.nii` and `.nii.gz`)

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::debug;

use super::service::VolumeReader;
use super::types::{Volume, VolumeError, VolumeInfo};

/// Fixed NIfTI-1 header size
const HEADER_SIZE: usize = 348;

/// Largest voxel count accepted from a header (8 GiB of `f32`)
const MAX_VOXELS: usize = 1 << 31;

/// Gzip member magic bytes
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Reads single-file NIfTI-1 volumes, gzipped or not
#[derive(Debug, Clone, Default)]
pub struct NiftiReader;

impl NiftiReader {
    pub fn new() -> Self {
        Self
    }

    /// Open a volume file, transparently decompressing gzip
    fn open(path: &Path) -> Result<Box<dyn Read>, VolumeError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VolumeError::NotFound(path.display().to_string()),
            _ => VolumeError::IoError(e),
        })?;
        let mut reader = BufReader::new(file);
        let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
        if is_gzip {
            Ok(Box::new(GzDecoder::new(reader)))
        } else {
            Ok(Box::new(reader))
        }
    }

    fn read_header(reader: &mut dyn Read) -> Result<Header, VolumeError> {
        let mut raw = [0u8; HEADER_SIZE];
        reader.read_exact(&mut raw).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                VolumeError::InvalidHeader("file shorter than a NIfTI-1 header".to_string())
            }
            _ => VolumeError::IoError(e),
        })?;
        Header::parse(&raw)
    }
}

/// The header fields needed to decode voxel data
#[derive(Debug, Clone)]
struct Header {
    little_endian: bool,
    shape: [usize; 3],
    spacing: [f32; 3],
    datatype: i16,
    vox_offset: usize,
    scl_slope: f32,
    scl_inter: f32,
}

impl Header {
    fn parse(raw: &[u8; HEADER_SIZE]) -> Result<Self, VolumeError> {
        let sizeof_le = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let sizeof_be = i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let little_endian = if sizeof_le == HEADER_SIZE as i32 {
            true
        } else if sizeof_be == HEADER_SIZE as i32 {
            false
        } else {
            return Err(VolumeError::InvalidHeader(format!(
                "sizeof_hdr is {} (expected 348)",
                sizeof_le
            )));
        };

        let magic = &raw[344..348];
        if magic != b"n+1\0" {
            return Err(VolumeError::InvalidHeader(
                "only single-file NIfTI-1 volumes are supported".to_string(),
            ));
        }

        let i16_at = |offset: usize| {
            let bytes = [raw[offset], raw[offset + 1]];
            if little_endian {
                i16::from_le_bytes(bytes)
            } else {
                i16::from_be_bytes(bytes)
            }
        };
        let f32_at = |offset: usize| {
            let bytes = [raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]];
            if little_endian {
                f32::from_le_bytes(bytes)
            } else {
                f32::from_be_bytes(bytes)
            }
        };

        let ndim = i16_at(40);
        if !(3..=7).contains(&ndim) {
            return Err(VolumeError::InvalidHeader(format!(
                "expected a 3-D volume, header declares {} dimensions",
                ndim
            )));
        }

        let mut shape = [0usize; 3];
        for (axis, extent) in shape.iter_mut().enumerate() {
            let dim = i16_at(42 + axis * 2);
            if dim <= 0 {
                return Err(VolumeError::InvalidHeader(format!(
                    "dimension {} has extent {}",
                    axis + 1,
                    dim
                )));
            }
            *extent = dim as usize;
        }

        let mut spacing = [1.0f32; 3];
        for (axis, step) in spacing.iter_mut().enumerate() {
            let pixdim = f32_at(80 + axis * 4).abs();
            if pixdim.is_finite() && pixdim > 0.0 {
                *step = pixdim;
            }
        }

        let vox_offset = f32_at(108);
        let vox_offset = if vox_offset.is_finite() && vox_offset >= HEADER_SIZE as f32 {
            vox_offset as usize
        } else {
            HEADER_SIZE + 4
        };

        Ok(Self {
            little_endian,
            shape,
            spacing,
            datatype: i16_at(70),
            vox_offset,
            scl_slope: f32_at(112),
            scl_inter: f32_at(116),
        })
    }

    fn bytes_per_voxel(&self) -> Result<usize, VolumeError> {
        match self.datatype {
            2 | 256 => Ok(1),
            4 | 512 => Ok(2),
            8 | 16 | 768 => Ok(4),
            64 => Ok(8),
            other => Err(VolumeError::UnsupportedDatatype(other)),
        }
    }

    /// Byte length of the first 3-D volume, refusing oversized headers
    fn data_len(&self) -> Result<usize, VolumeError> {
        let bytes_per_voxel = self.bytes_per_voxel()?;
        self.shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .filter(|&voxels| voxels <= MAX_VOXELS)
            .and_then(|voxels| voxels.checked_mul(bytes_per_voxel))
            .ok_or_else(|| {
                VolumeError::InvalidHeader(format!("volume {:?} is too large", self.shape))
            })
    }

    fn info(&self) -> VolumeInfo {
        VolumeInfo {
            shape: self.shape,
            spacing: self.spacing,
        }
    }

    /// Scaling only applies when the slope is meaningful and not identity
    fn scaling(&self) -> Option<(f32, f32)> {
        let slope = self.scl_slope;
        let inter = if self.scl_inter.is_finite() {
            self.scl_inter
        } else {
            0.0
        };
        if slope.is_finite() && slope != 0.0 && !(slope == 1.0 && inter == 0.0) {
            Some((slope, inter))
        } else {
            None
        }
    }

    fn decode(&self, raw: &[u8]) -> Result<Vec<f32>, VolumeError> {
        let le = self.little_endian;
        let values: Vec<f32> = match self.datatype {
            2 => raw.iter().map(|&b| b as f32).collect(),
            256 => raw.iter().map(|&b| b as i8 as f32).collect(),
            4 => raw
                .chunks_exact(2)
                .map(|c| {
                    let b = [c[0], c[1]];
                    (if le { i16::from_le_bytes(b) } else { i16::from_be_bytes(b) }) as f32
                })
                .collect(),
            512 => raw
                .chunks_exact(2)
                .map(|c| {
                    let b = [c[0], c[1]];
                    (if le { u16::from_le_bytes(b) } else { u16::from_be_bytes(b) }) as f32
                })
                .collect(),
            8 => raw
                .chunks_exact(4)
                .map(|c| {
                    let b = [c[0], c[1], c[2], c[3]];
                    (if le { i32::from_le_bytes(b) } else { i32::from_be_bytes(b) }) as f32
                })
                .collect(),
            768 => raw
                .chunks_exact(4)
                .map(|c| {
                    let b = [c[0], c[1], c[2], c[3]];
                    (if le { u32::from_le_bytes(b) } else { u32::from_be_bytes(b) }) as f32
                })
                .collect(),
            16 => raw
                .chunks_exact(4)
                .map(|c| {
                    let b = [c[0], c[1], c[2], c[3]];
                    if le { f32::from_le_bytes(b) } else { f32::from_be_bytes(b) }
                })
                .collect(),
            64 => raw
                .chunks_exact(8)
                .map(|c| {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(c);
                    (if le { f64::from_le_bytes(b) } else { f64::from_be_bytes(b) }) as f32
                })
                .collect(),
            other => return Err(VolumeError::UnsupportedDatatype(other)),
        };

        match self.scaling() {
            Some((slope, inter)) => Ok(values.into_iter().map(|v| v * slope + inter).collect()),
            None => Ok(values),
        }
    }
}

impl VolumeReader for NiftiReader {
    fn read(&self, path: &Path) -> Result<Volume<f32>, VolumeError> {
        let mut reader = Self::open(path)?;
        let header = Self::read_header(&mut reader)?;

        // Skip extensions between the header and the voxel data
        let skip = (header.vox_offset - HEADER_SIZE) as u64;
        io::copy(&mut (&mut reader).take(skip), &mut io::sink())?;

        // 4-D inputs keep only the first volume
        // Grows with the bytes actually present, never with the header's claim
        let expected = header.data_len()?;
        let mut raw = Vec::new();
        reader.take(expected as u64).read_to_end(&mut raw)?;
        if raw.len() != expected {
            return Err(VolumeError::Truncated {
                expected,
                actual: raw.len(),
            });
        }

        let data = header.decode(&raw)?;
        debug!(
            "Read volume {:?}: shape={:?} spacing={:?} datatype={}",
            path, header.shape, header.spacing, header.datatype
        );
        Volume::new(header.shape, header.spacing, data)
    }

    fn read_info(&self, path: &Path) -> Result<VolumeInfo, VolumeError> {
        let mut reader = Self::open(path)?;
        Ok(Self::read_header(&mut reader)?.info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::path::PathBuf;

    fn header_bytes(shape: [i16; 3], datatype: i16, bitpix: i16, little_endian: bool) -> Vec<u8> {
        let mut raw = vec![0u8; HEADER_SIZE + 4];
        let put_i16 = |raw: &mut Vec<u8>, offset: usize, v: i16| {
            let b = if little_endian { v.to_le_bytes() } else { v.to_be_bytes() };
            raw[offset..offset + 2].copy_from_slice(&b);
        };
        let put_f32 = |raw: &mut Vec<u8>, offset: usize, v: f32| {
            let b = if little_endian { v.to_le_bytes() } else { v.to_be_bytes() };
            raw[offset..offset + 4].copy_from_slice(&b);
        };
        let sizeof = if little_endian {
            348i32.to_le_bytes()
        } else {
            348i32.to_be_bytes()
        };
        raw[0..4].copy_from_slice(&sizeof);
        put_i16(&mut raw, 40, 3);
        for (i, d) in shape.iter().enumerate() {
            put_i16(&mut raw, 42 + i * 2, *d);
        }
        put_i16(&mut raw, 70, datatype);
        put_i16(&mut raw, 72, bitpix);
        put_f32(&mut raw, 80, 0.8);
        put_f32(&mut raw, 84, 0.8);
        put_f32(&mut raw, 88, 2.5);
        put_f32(&mut raw, 108, 352.0);
        put_f32(&mut raw, 112, 1.0);
        raw[344..348].copy_from_slice(b"n+1\0");
        raw
    }

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ctseg_nifti_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn test_read_plain_i16_volume() {
        let mut bytes = header_bytes([3, 2, 2], 4, 16, true);
        for v in 0..12i16 {
            bytes.extend_from_slice(&(v - 6).to_le_bytes());
        }
        let path = temp_path("ct.nii");
        std::fs::write(&path, &bytes).unwrap();

        let volume = NiftiReader::new().read(&path).unwrap();
        assert_eq!(volume.shape(), [3, 2, 2]);
        assert_eq!(volume.spacing(), [0.8, 0.8, 2.5]);
        assert_eq!(volume.get(0, 0, 0), Some(-6.0));
        assert_eq!(volume.get(2, 1, 1), Some(5.0));
    }

    #[test]
    fn test_read_gzipped_big_endian_f32_volume() {
        let mut bytes = header_bytes([2, 2, 1], 16, 32, false);
        for v in [1.5f32, -2.0, 3.25, 100.0] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        let path = temp_path("ct.nii.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&bytes).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let reader = NiftiReader::new();
        let volume = reader.read(&path).unwrap();
        assert_eq!(volume.as_slice(), &[1.5, -2.0, 3.25, 100.0]);

        let info = reader.read_info(&path).unwrap();
        assert_eq!(info.shape, [2, 2, 1]);
    }

    #[test]
    fn test_scaling_is_applied() {
        let mut bytes = header_bytes([2, 1, 1], 2, 8, true);
        bytes[112..116].copy_from_slice(&2.0f32.to_le_bytes());
        bytes[116..120].copy_from_slice(&(-1024.0f32).to_le_bytes());
        bytes.extend_from_slice(&[0, 10]);
        let path = temp_path("scaled.nii");
        std::fs::write(&path, &bytes).unwrap();

        let volume = NiftiReader::new().read(&path).unwrap();
        assert_eq!(volume.as_slice(), &[-1024.0, -1004.0]);
    }

    #[test]
    fn test_truncated_data_is_rejected() {
        let mut bytes = header_bytes([4, 4, 4], 2, 8, true);
        bytes.extend_from_slice(&[0u8; 10]);
        let path = temp_path("short.nii");
        std::fs::write(&path, &bytes).unwrap();

        let result = NiftiReader::new().read(&path);
        assert!(matches!(
            result,
            Err(VolumeError::Truncated {
                expected: 64,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        let bytes = header_bytes([32767, 32767, 32767], 64, 64, true);
        let path = temp_path("huge.nii");
        std::fs::write(&path, &bytes).unwrap();

        let result = NiftiReader::new().read(&path);
        assert!(matches!(result, Err(VolumeError::InvalidHeader(_))));
    }

    #[test]
    fn test_large_header_with_little_data_is_truncated() {
        let mut bytes = header_bytes([1024, 1024, 1024], 2, 8, true);
        bytes.extend_from_slice(&[1u8; 16]);
        let path = temp_path("claims_a_gigabyte.nii");
        std::fs::write(&path, &bytes).unwrap();

        let result = NiftiReader::new().read(&path);
        assert!(matches!(
            result,
            Err(VolumeError::Truncated {
                expected: 1_073_741_824,
                actual: 16
            })
        ));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let path = temp_path("absent.nii.gz");
        let result = NiftiReader::new().read(&path);
        assert!(matches!(result, Err(VolumeError::NotFound(_))));
    }

    #[test]
    fn test_garbage_header_is_rejected() {
        let path = temp_path("garbage.nii");
        std::fs::write(&path, vec![7u8; 400]).unwrap();
        let result = NiftiReader::new().read(&path);
        assert!(matches!(result, Err(VolumeError::InvalidHeader(_))));
    }
}
