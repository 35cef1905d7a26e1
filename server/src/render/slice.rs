//! Axial slice rendering with mask tint and point markers

use std::time::Instant;

use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder, Rgb, RgbImage};
use metrics::histogram;
use thiserror::Error;
use tracing::warn;

use crate::interactive::InteractionPoint;
use crate::volume::{LabelVolume, Volume, VolumeError};

/// Lower and upper intensity percentiles used for windowing
const WINDOW_PERCENTILES: (f32, f32) = (1.0, 99.0);

/// Guards the window denominator against flat slices
const WINDOW_EPSILON: f32 = 1e-5;

/// Half-width of the `x` point marker (7x7 pixels)
const MARKER_RADIUS: i64 = 3;

const POSITIVE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const NEGATIVE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// Errors that can occur when rendering a slice
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error("Volume has no voxels to render")]
    EmptyVolume,

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// An encoded slice and the index actually rendered
#[derive(Debug, Clone)]
pub struct RenderedSlice {
    pub index: usize,
    pub png: Bytes,
}

/// Composed raster before encoding
#[derive(Debug, Clone)]
pub enum Raster {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl Raster {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Raster::Gray(img) => img.dimensions(),
            Raster::Rgb(img) => img.dimensions(),
        }
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, RenderError> {
        let mut buffer = Vec::new();
        let encoder = PngEncoder::new(&mut buffer);
        let result = match self {
            Raster::Gray(img) => encoder.write_image(
                img.as_raw(),
                img.width(),
                img.height(),
                ExtendedColorType::L8,
            ),
            Raster::Rgb(img) => encoder.write_image(
                img.as_raw(),
                img.width(),
                img.height(),
                ExtendedColorType::Rgb8,
            ),
        };
        result.map_err(|e| RenderError::Encode(e.to_string()))?;
        Ok(buffer)
    }
}

/// Slice index actually rendered: out-of-range requests fall back to the middle
pub fn effective_index(depth: usize, requested: usize) -> usize {
    if requested < depth { requested } else { depth / 2 }
}

/// Percentile with linear interpolation between closest ranks
fn percentile(sorted: &[f32], p: f32) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Window intensities to 8-bit using the 1st/99th percentiles
pub fn window_to_u8(values: &[f32]) -> Vec<u8> {
    let clean: Vec<f32> = values
        .iter()
        .map(|&v| if v.is_finite() { v } else { 0.0 })
        .collect();
    let mut sorted = clean.clone();
    sorted.sort_by(f32::total_cmp);
    let lo = percentile(&sorted, WINDOW_PERCENTILES.0);
    let hi = percentile(&sorted, WINDOW_PERCENTILES.1);
    let scale = hi - lo + WINDOW_EPSILON;

    clean
        .into_iter()
        .map(|v| {
            let n = ((v - lo) / scale).clamp(0.0, 1.0);
            (n * 255.0).floor() as u8
        })
        .collect()
}

/// Mask plane aligned to the image plane, transposing once if needed
fn aligned_mask_plane(mask: &LabelVolume, index: usize, nx: usize, ny: usize) -> Option<Vec<u8>> {
    let [mx, my, mz] = mask.shape();
    if index >= mz {
        warn!("Mask depth {} has no slice {}, dropping overlay", mz, index);
        return None;
    }
    let plane = mask.slice(index)?;
    if mx == nx && my == ny {
        return Some(plane.to_vec());
    }
    if mx == ny && my == nx {
        let mut transposed = vec![0u8; nx * ny];
        for y in 0..ny {
            for x in 0..nx {
                transposed[x + nx * y] = plane[y + mx * x];
            }
        }
        return Some(transposed);
    }
    warn!(
        "Mask slice {}x{} does not match image slice {}x{}, dropping overlay",
        mx, my, nx, ny
    );
    None
}

fn draw_marker(img: &mut RgbImage, x: usize, y: usize, color: Rgb<u8>) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let (cx, cy) = (x as i64, y as i64);
    for d in -MARKER_RADIUS..=MARKER_RADIUS {
        for (px, py) in [(cx + d, cy + d), (cx + d, cy - d)] {
            if (0..w).contains(&px) && (0..h).contains(&py) {
                img.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}

/// Renders axial slices of a volume to PNG
#[derive(Debug, Clone, Default)]
pub struct SliceRenderer;

impl SliceRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Build the raster for a slice; columns are x, rows are y
    pub fn compose(
        &self,
        volume: &Volume<f32>,
        requested: usize,
        mask: Option<&LabelVolume>,
        points: &[InteractionPoint],
    ) -> Result<(usize, Raster), RenderError> {
        let [nx, ny, nz] = volume.shape();
        if volume.is_empty() || nz == 0 {
            return Err(RenderError::EmptyVolume);
        }
        let index = effective_index(nz, requested);
        let plane = volume.slice(index).ok_or(RenderError::EmptyVolume)?;
        let gray = window_to_u8(plane);

        let (width, height) = (nx as u32, ny as u32);
        let on_slice: Vec<&InteractionPoint> = points.iter().filter(|p| p.z == index).collect();

        if mask.is_none() && on_slice.is_empty() {
            let img = GrayImage::from_raw(width, height, gray)
                .ok_or_else(|| RenderError::Encode("slice buffer size mismatch".to_string()))?;
            return Ok((index, Raster::Gray(img)));
        }

        let overlay = mask.and_then(|m| aligned_mask_plane(m, index, nx, ny));
        let mut rgb = Vec::with_capacity(gray.len() * 3);
        for (i, &g) in gray.iter().enumerate() {
            let tinted = overlay.as_ref().is_some_and(|m| m[i] > 0);
            if tinted {
                let g = g as f32;
                let half = (0.5 * g) as u8;
                rgb.extend_from_slice(&[(0.5 * g + 127.5) as u8, half, half]);
            } else {
                rgb.extend_from_slice(&[g, g, g]);
            }
        }
        let mut img = RgbImage::from_raw(width, height, rgb)
            .ok_or_else(|| RenderError::Encode("slice buffer size mismatch".to_string()))?;

        for point in on_slice {
            let color = if point.positive {
                POSITIVE_COLOR
            } else {
                NEGATIVE_COLOR
            };
            draw_marker(&mut img, point.x, point.y, color);
        }
        Ok((index, Raster::Rgb(img)))
    }

    /// Compose and encode a slice
    pub fn render(
        &self,
        volume: &Volume<f32>,
        requested: usize,
        mask: Option<&LabelVolume>,
        points: &[InteractionPoint],
    ) -> Result<RenderedSlice, RenderError> {
        let start = Instant::now();
        let (index, raster) = self.compose(volume, requested, mask, points)?;
        let png = raster.encode_png()?;
        histogram!("ctseg_slice_render_duration_seconds").record(start.elapsed());
        Ok(RenderedSlice {
            index,
            png: Bytes::from(png),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// nx=4, ny=3, nz=depth; voxel value = x + 10*y + 100*z
    fn ramp(depth: usize) -> Volume<f32> {
        let shape = [4, 3, depth];
        let mut data = Vec::new();
        for z in 0..depth {
            for y in 0..3 {
                for x in 0..4 {
                    data.push((x + 10 * y + 100 * z) as f32);
                }
            }
        }
        Volume::new(shape, [1.0; 3], data).unwrap()
    }

    #[test]
    fn test_out_of_range_index_uses_middle_slice() {
        assert_eq!(effective_index(100, 150), 50);
        assert_eq!(effective_index(100, 100), 50);
        assert_eq!(effective_index(100, 99), 99);
        assert_eq!(effective_index(1, 7), 0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted: Vec<f32> = (0..=100).map(|v| v as f32).collect();
        assert_eq!(percentile(&sorted, 1.0), 1.0);
        assert_eq!(percentile(&sorted, 99.0), 99.0);
        let pair = [0.0, 10.0];
        assert!((percentile(&pair, 99.0) - 9.9).abs() < 1e-4);
    }

    #[test]
    fn test_window_handles_flat_and_non_finite() {
        assert_eq!(window_to_u8(&[5.0, 5.0, 5.0]), vec![0, 0, 0]);
        let out = window_to_u8(&[f32::NAN, 0.0, 1000.0, f32::INFINITY]);
        assert_eq!(out[0], out[1]);
        assert_eq!(out[2], 255);
    }

    #[test]
    fn test_plain_slice_is_grayscale() {
        let volume = ramp(4);
        let (index, raster) = SliceRenderer::new().compose(&volume, 9, None, &[]).unwrap();
        assert_eq!(index, 2);
        assert!(matches!(raster, Raster::Gray(_)));
        assert_eq!(raster.dimensions(), (4, 3));

        if let Raster::Gray(img) = raster {
            // columns follow x, rows follow y
            assert!(img.get_pixel(3, 0)[0] > img.get_pixel(0, 0)[0]);
            assert!(img.get_pixel(0, 2)[0] > img.get_pixel(3, 0)[0]);
        }
    }

    #[test]
    fn test_mask_tints_pixels() {
        let volume = ramp(2);
        let mut mask = Volume::filled([4, 3, 2], [1.0; 3], 0u8);
        mask.set(3, 2, 1, 1);

        let (_, raster) = SliceRenderer::new()
            .compose(&volume, 1, Some(&mask), &[])
            .unwrap();
        let Raster::Rgb(img) = raster else {
            panic!("expected rgb raster");
        };
        let tinted = img.get_pixel(3, 2);
        assert_eq!(tinted[0], 255);
        assert_eq!(tinted[1], 127);
        assert_eq!(tinted[2], 127);
        let plain = img.get_pixel(0, 0);
        assert_eq!(plain[0], plain[1]);
    }

    #[test]
    fn test_transposed_mask_is_realigned() {
        let volume = ramp(1);
        let mut mask = Volume::filled([3, 4, 1], [1.0; 3], 0u8);
        // mask (i=2, j=3) is image (x=3, y=2)
        mask.set(2, 3, 0, 1);

        let (_, raster) = SliceRenderer::new()
            .compose(&volume, 0, Some(&mask), &[])
            .unwrap();
        let Raster::Rgb(img) = raster else {
            panic!("expected rgb raster");
        };
        let p = img.get_pixel(3, 2);
        assert_ne!(p[0], p[1]);
    }

    #[test]
    fn test_mismatched_mask_is_dropped() {
        let volume = ramp(2);
        let mask = Volume::filled([5, 5, 2], [1.0; 3], 1u8);
        let (_, raster) = SliceRenderer::new()
            .compose(&volume, 0, Some(&mask), &[])
            .unwrap();
        let Raster::Rgb(img) = raster else {
            panic!("expected rgb raster");
        };
        assert!(img.pixels().all(|p| p[0] == p[1] && p[1] == p[2]));
    }

    #[test]
    fn test_mask_without_slice_is_dropped() {
        let volume = ramp(4);
        let mask = Volume::filled([4, 3, 1], [1.0; 3], 1u8);
        let (_, raster) = SliceRenderer::new()
            .compose(&volume, 3, Some(&mask), &[])
            .unwrap();
        let Raster::Rgb(img) = raster else {
            panic!("expected rgb raster");
        };
        assert!(img.pixels().all(|p| p[0] == p[1]));
    }

    #[test]
    fn test_points_are_drawn_and_clipped() {
        let volume = Volume::filled([16, 16, 2], [1.0; 3], 0.0);
        let points = [
            InteractionPoint {
                x: 8,
                y: 8,
                z: 1,
                positive: true,
            },
            InteractionPoint {
                x: 0,
                y: 0,
                z: 1,
                positive: false,
            },
            InteractionPoint {
                x: 4,
                y: 4,
                z: 0,
                positive: true,
            },
        ];
        let (_, raster) = SliceRenderer::new()
            .compose(&volume, 1, None, &points)
            .unwrap();
        let Raster::Rgb(img) = raster else {
            panic!("expected rgb raster");
        };
        assert_eq!(*img.get_pixel(8, 8), POSITIVE_COLOR);
        assert_eq!(*img.get_pixel(11, 5), POSITIVE_COLOR);
        assert_eq!(*img.get_pixel(5, 11), POSITIVE_COLOR);
        assert_eq!(*img.get_pixel(3, 3), NEGATIVE_COLOR);
        // other slice's point is not drawn
        assert_eq!(*img.get_pixel(4, 4), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_render_encodes_png() {
        let volume = ramp(3);
        let rendered = SliceRenderer::new().render(&volume, 1, None, &[]).unwrap();
        assert_eq!(rendered.index, 1);
        assert_eq!(&rendered.png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_empty_volume_is_an_error() {
        let volume = Volume::<f32>::filled([0, 0, 0], [1.0; 3], 0.0);
        assert!(matches!(
            SliceRenderer::new().compose(&volume, 0, None, &[]),
            Err(RenderError::EmptyVolume)
        ));
    }
}
