//! Region-growing inference engine

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use super::engine::{EngineError, EngineFactory, InferenceEngine};
use crate::volume::{LabelVolume, Volume};

/// Parameter file inside the model directory
pub const ENGINE_PARAMS_FILE: &str = "engine.json";

/// Label written by include interactions
const FOREGROUND: u8 = 1;

/// 6-connected neighbourhood
const NEIGHBOURS: [[isize; 3]; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SeedGrowParams {
    /// Maximum absolute intensity difference from the seed voxel
    pub tolerance: f32,
    /// Maximum per-axis distance from the seed, in voxels
    pub max_radius: usize,
}

impl Default for SeedGrowParams {
    fn default() -> Self {
        Self {
            tolerance: 150.0,
            max_radius: 64,
        }
    }
}

/// Grows (or carves) a 6-connected region around each clicked voxel
#[derive(Debug, Default)]
pub struct SeedGrowEngine {
    params: SeedGrowParams,
    image: Option<Arc<Volume<f32>>>,
    target: Option<LabelVolume>,
}

impl SeedGrowEngine {
    pub fn new(params: SeedGrowParams) -> Self {
        Self {
            params,
            image: None,
            target: None,
        }
    }

    pub fn params(&self) -> SeedGrowParams {
        self.params
    }
}

/// Axis-aligned box around the seed, clamped to the volume
struct Window {
    origin: [usize; 3],
    dims: [usize; 3],
}

impl Window {
    fn around(seed: [usize; 3], radius: usize, shape: [usize; 3]) -> Self {
        let mut origin = [0; 3];
        let mut dims = [0; 3];
        for axis in 0..3 {
            origin[axis] = seed[axis].saturating_sub(radius);
            let end = seed[axis].saturating_add(radius).saturating_add(1).min(shape[axis]);
            dims[axis] = end - origin[axis];
        }
        Self { origin, dims }
    }

    fn local_index(&self, p: [usize; 3]) -> usize {
        let l = [
            p[0] - self.origin[0],
            p[1] - self.origin[1],
            p[2] - self.origin[2],
        ];
        l[0] + self.dims[0] * (l[1] + self.dims[1] * l[2])
    }

    fn len(&self) -> usize {
        self.dims.iter().product()
    }

    fn step(&self, p: [usize; 3], delta: [isize; 3]) -> Option<[usize; 3]> {
        let mut next = [0; 3];
        for axis in 0..3 {
            let v = p[axis].checked_add_signed(delta[axis])?;
            if v < self.origin[axis] || v >= self.origin[axis] + self.dims[axis] {
                return None;
            }
            next[axis] = v;
        }
        Some(next)
    }
}

/// Breadth-first flood from `seed` over voxels accepted by `accept`,
/// returning their volume indices
fn flood<F>(shape: [usize; 3], seed: [usize; 3], radius: usize, accept: F) -> Vec<usize>
where
    F: Fn(usize) -> bool,
{
    let global = |p: [usize; 3]| p[0] + shape[0] * (p[1] + shape[1] * p[2]);
    if !accept(global(seed)) {
        return Vec::new();
    }

    let window = Window::around(seed, radius, shape);
    let mut visited = vec![false; window.len()];
    let mut queue = VecDeque::from([seed]);
    let mut region = Vec::new();
    visited[window.local_index(seed)] = true;

    while let Some(p) = queue.pop_front() {
        region.push(global(p));
        for delta in NEIGHBOURS {
            let Some(next) = window.step(p, delta) else {
                continue;
            };
            let local = window.local_index(next);
            if !visited[local] && accept(global(next)) {
                visited[local] = true;
                queue.push_back(next);
            }
        }
    }
    region
}

impl InferenceEngine for SeedGrowEngine {
    fn set_image(&mut self, image: Arc<Volume<f32>>) -> Result<(), EngineError> {
        self.image = Some(image);
        Ok(())
    }

    fn set_target_buffer(&mut self, target: LabelVolume) -> Result<(), EngineError> {
        if let Some(image) = &self.image
            && image.shape() != target.shape()
        {
            return Err(EngineError::ShapeMismatch {
                target: target.shape(),
                image: image.shape(),
            });
        }
        self.target = Some(target);
        Ok(())
    }

    fn add_point_interaction(
        &mut self,
        point: [usize; 3],
        include: bool,
    ) -> Result<(), EngineError> {
        let image = self.image.as_ref().ok_or(EngineError::NoImage)?;
        let target = self.target.as_mut().ok_or(EngineError::NoTarget)?;
        let shape = image.shape();
        if !image.contains(point[0], point[1], point[2]) {
            return Err(EngineError::OutOfBounds { point, shape });
        }

        let radius = self.params.max_radius;
        let region = if include {
            let voxels = image.as_slice();
            let seed_value = voxels[image.index(point[0], point[1], point[2])];
            if !seed_value.is_finite() {
                return Err(EngineError::Inference(format!(
                    "seed voxel {:?} has no finite intensity",
                    point
                )));
            }
            let tolerance = self.params.tolerance;
            flood(shape, point, radius, |i| {
                let v = voxels[i];
                v.is_finite() && (v - seed_value).abs() <= tolerance
            })
        } else {
            let labels = target.as_slice();
            flood(shape, point, radius, |i| labels[i] > 0)
        };

        let value = if include { FOREGROUND } else { 0 };
        let labels = target.as_mut_slice();
        for &i in &region {
            labels[i] = value;
        }
        debug!(
            "Seed grow at {:?} (include={}) touched {} voxels",
            point,
            include,
            region.len()
        );
        Ok(())
    }

    fn target(&self) -> Result<&LabelVolume, EngineError> {
        self.target.as_ref().ok_or(EngineError::NoTarget)
    }

    fn target_mut(&mut self) -> Result<&mut LabelVolume, EngineError> {
        self.target.as_mut().ok_or(EngineError::NoTarget)
    }
}

/// Builds `SeedGrowEngine`s from `<model_dir>/engine.json`
#[derive(Debug, Clone, Default)]
pub struct SeedGrowFactory;

impl SeedGrowFactory {
    pub fn new() -> Self {
        Self
    }

    fn load_params(model_dir: &Path) -> Result<SeedGrowParams, EngineError> {
        if !model_dir.is_dir() {
            return Err(EngineError::ModelUnavailable(format!(
                "model directory {:?} not found",
                model_dir
            )));
        }
        let path = model_dir.join(ENGINE_PARAMS_FILE);
        if !path.is_file() {
            return Ok(SeedGrowParams::default());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::ModelUnavailable(format!("{:?}: {}", path, e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| EngineError::ModelUnavailable(format!("{:?}: {}", path, e)))
    }
}

impl EngineFactory for SeedGrowFactory {
    fn initialize(&self, model_dir: &Path) -> Result<Box<dyn InferenceEngine>, EngineError> {
        let params = Self::load_params(model_dir)?;
        info!(
            "Initialized seed-grow engine from {:?}: tolerance={} max_radius={}",
            model_dir, params.tolerance, params.max_radius
        );
        Ok(Box::new(SeedGrowEngine::new(params)))
    }
}
