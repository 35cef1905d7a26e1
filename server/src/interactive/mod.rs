//! Interactive, point-driven segmentation refinement
//!
//! This module provides:
//! - `InferenceEngine` / `EngineFactory` traits for the point-prompted model
//! - `SeedGrowEngine`, the default region-growing engine
//! - `SessionManager`, the per-case session cache
//! - HTTP routes for clicks, clearing and point retrieval

mod engine;
mod manager;
pub mod routes;
mod seed_grow;
mod session;

pub use engine::{EngineError, EngineFactory, InferenceEngine};
pub use manager::{AddPointOutcome, SessionError, SessionManager, SessionManagerConfig};
pub use routes::interactive_routes;
pub use seed_grow::{ENGINE_PARAMS_FILE, SeedGrowEngine, SeedGrowFactory, SeedGrowParams};
pub use session::{InteractionPoint, InteractiveSession, SegmentationStats};
