//! rf-core: shared error taxonomy, configuration, project model, scene
//! timing and progress aggregation.
//!
//! This crate is the foundational dependency for all other rf-* crates.

pub mod config;
pub mod error;
pub mod model;
pub mod progress;
pub mod timing;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, ErrorKind, Result};
pub use model::*;
pub use progress::{ProgressAggregator, ProgressCounter, StageProgress};
pub use timing::{allocate_scene_durations, MIN_SCENE_SECS};
