//! Per-case interactive session

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::engine::{EngineError, InferenceEngine};
use crate::volume::{LabelVolume, Volume};

/// A user click in voxel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionPoint {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub positive: bool,
}

impl InteractionPoint {
    pub fn coords(&self) -> [usize; 3] {
        [self.x, self.y, self.z]
    }
}

/// Label summary returned after each interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationStats {
    /// Sorted distinct label values present in the buffer
    pub unique_values: Vec<u8>,
    /// Voxels with a nonzero label
    pub total_voxels: usize,
}

impl SegmentationStats {
    pub fn of(labels: &LabelVolume) -> Self {
        let mut seen = [false; 256];
        let mut total_voxels = 0;
        for &v in labels.as_slice() {
            seen[v as usize] = true;
            if v > 0 {
                total_voxels += 1;
            }
        }
        let unique_values = (0..=u8::MAX).filter(|&v| seen[v as usize]).collect();
        Self {
            unique_values,
            total_voxels,
        }
    }
}

struct SessionState {
    engine: Box<dyn InferenceEngine>,
    points: Vec<InteractionPoint>,
}

/// Loaded volume, engine and click history for one case.
///
/// All engine access goes through the session mutex, which serializes
/// writers on the same case without blocking other cases.
pub struct InteractiveSession {
    case_id: String,
    volume: Arc<Volume<f32>>,
    state: Mutex<SessionState>,
}

impl InteractiveSession {
    pub fn new(
        case_id: impl Into<String>,
        volume: Arc<Volume<f32>>,
        engine: Box<dyn InferenceEngine>,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            volume,
            state: Mutex::new(SessionState {
                engine,
                points: Vec::new(),
            }),
        }
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn volume(&self) -> &Arc<Volume<f32>> {
        &self.volume
    }

    /// Forward a click to the engine and record it
    pub fn add_point(&self, point: InteractionPoint) -> Result<SegmentationStats, EngineError> {
        let mut state = self.state.lock();
        state
            .engine
            .add_point_interaction(point.coords(), point.positive)?;
        state.points.push(point);
        Ok(SegmentationStats::of(state.engine.target()?))
    }

    /// Zero the label buffer and forget every point, keeping the session
    pub fn clear(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.engine.target_mut()?.fill(0);
        state.points.clear();
        Ok(())
    }

    pub fn points(&self) -> Vec<InteractionPoint> {
        self.state.lock().points.clone()
    }

    /// Points on axial slice `z`, in click order
    pub fn points_for_slice(&self, z: usize) -> Vec<InteractionPoint> {
        self.state
            .lock()
            .points
            .iter()
            .filter(|p| p.z == z)
            .copied()
            .collect()
    }

    /// Run `f` against the current mask and points under the session lock
    pub fn with_mask<R, F>(&self, f: F) -> Result<R, EngineError>
    where
        F: FnOnce(&LabelVolume, &[InteractionPoint]) -> R,
    {
        let state = self.state.lock();
        let mask = state.engine.target()?;
        Ok(f(mask, &state.points))
    }
}
