//! Inference engine traits and error definitions

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::volume::{LabelVolume, Volume};

/// Errors raised by an inference engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Point {point:?} is outside the volume {shape:?}")]
    OutOfBounds { point: [usize; 3], shape: [usize; 3] },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("No image has been set")]
    NoImage,

    #[error("No target buffer has been set")]
    NoTarget,

    #[error("Target buffer shape {target:?} does not match image shape {image:?}")]
    ShapeMismatch {
        target: [usize; 3],
        image: [usize; 3],
    },

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// A point-prompted segmentation model bound to one image.
///
/// The engine owns the label buffer it writes into; callers read it back
/// through `target`.
pub trait InferenceEngine: Send {
    fn set_image(&mut self, image: Arc<Volume<f32>>) -> Result<(), EngineError>;

    /// Install the label buffer that interactions write into
    fn set_target_buffer(&mut self, target: LabelVolume) -> Result<(), EngineError>;

    /// Apply one click; `include` grows the mask, otherwise it carves it
    fn add_point_interaction(&mut self, point: [usize; 3], include: bool)
    -> Result<(), EngineError>;

    fn target(&self) -> Result<&LabelVolume, EngineError>;

    fn target_mut(&mut self) -> Result<&mut LabelVolume, EngineError>;
}

/// Creates engines from a trained model artifact directory
pub trait EngineFactory: Send + Sync {
    fn initialize(&self, model_dir: &Path) -> Result<Box<dyn InferenceEngine>, EngineError>;
}
