//! Slice rendering
//!
//! This module provides:
//! - `SliceRenderer`, which windows an axial slice and draws the mask and points
//! - `PreviewGenerator` trait with `SlicePreviewGenerator` for finished jobs
//! - HTTP routes for image info, slices and previews

mod preview;
pub mod routes;
mod slice;

pub use preview::{PREVIEW_SLICES, PREVIEW_STRUCTURES, PreviewGenerator, SlicePreviewGenerator};
pub use routes::render_routes;
pub use slice::{Raster, RenderError, RenderedSlice, SliceRenderer, effective_index, window_to_u8};
