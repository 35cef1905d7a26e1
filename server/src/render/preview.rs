//! PNG previews of finished segmentation masks

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use super::slice::{RenderError, SliceRenderer};
use crate::case::CaseStore;
use crate::volume::{LabelVolume, Volume, VolumeReader};

/// Masks previewed after a successful job, by file stem
pub const PREVIEW_STRUCTURES: [&str; 4] =
    ["liver", "kidney_left", "kidney_right", "combined_labels"];

/// Slices rendered per structure, centred on the middle slice
pub const PREVIEW_SLICES: usize = 5;

/// Best-effort preview generation for a finished case
pub trait PreviewGenerator: Send + Sync {
    /// Write previews and return their paths
    fn generate(&self, case: &str) -> Result<Vec<PathBuf>, RenderError>;
}

/// Renders mask slices over the case CT into `<preview_dir>/<case>/`
pub struct SlicePreviewGenerator {
    reader: Arc<dyn VolumeReader>,
    cases: CaseStore,
    preview_dir: PathBuf,
    renderer: SliceRenderer,
}

impl SlicePreviewGenerator {
    pub fn new(reader: Arc<dyn VolumeReader>, cases: CaseStore, preview_dir: PathBuf) -> Self {
        Self {
            reader,
            cases,
            preview_dir,
            renderer: SliceRenderer::new(),
        }
    }

    /// `<structure>_slice_<NNN>.png`
    pub fn file_name(structure: &str, index: usize) -> String {
        format!("{}_slice_{:03}.png", structure, index)
    }

    /// Up to `PREVIEW_SLICES` consecutive slices around the middle
    pub fn candidate_slices(depth: usize) -> std::ops::Range<usize> {
        let start = (depth / 2).saturating_sub(PREVIEW_SLICES / 2);
        let end = depth.min(start + PREVIEW_SLICES);
        start..end
    }

    fn load_mask(&self, path: &std::path::Path) -> Result<LabelVolume, RenderError> {
        let raw = self.reader.read(path)?;
        let labels = raw
            .as_slice()
            .iter()
            .map(|&v| {
                if v.is_finite() {
                    v.round().clamp(0.0, 255.0) as u8
                } else {
                    0
                }
            })
            .collect();
        Ok(Volume::new(raw.shape(), raw.spacing(), labels)?)
    }
}

impl PreviewGenerator for SlicePreviewGenerator {
    fn generate(&self, case: &str) -> Result<Vec<PathBuf>, RenderError> {
        let segmentations = self.cases.segmentations_dir(case);
        let masks: Vec<(&str, PathBuf)> = PREVIEW_STRUCTURES
            .iter()
            .map(|s| (*s, segmentations.join(format!("{}.nii.gz", s))))
            .filter(|(_, path)| path.is_file())
            .collect();
        if masks.is_empty() {
            debug!("No previewable masks for {} in {:?}", case, segmentations);
            return Ok(Vec::new());
        }

        let ct = self.reader.read(&self.cases.input_volume_path(case))?;
        let out_dir = self.preview_dir.join(case);
        std::fs::create_dir_all(&out_dir)?;

        let mut written = Vec::new();
        for (structure, path) in masks {
            let mask = match self.load_mask(&path) {
                Ok(mask) => mask,
                Err(e) => {
                    warn!("Skipping preview of {:?}: {}", path, e);
                    continue;
                }
            };

            for index in Self::candidate_slices(mask.depth()) {
                let has_labels = mask
                    .slice(index)
                    .is_some_and(|plane| plane.iter().any(|&v| v > 0));
                if !has_labels || index >= ct.depth() {
                    continue;
                }
                let rendered = self.renderer.render(&ct, index, Some(&mask), &[])?;
                let target = out_dir.join(Self::file_name(structure, index));
                std::fs::write(&target, &rendered.png)?;
                written.push(target);
            }
        }
        Ok(written)
    }
}
