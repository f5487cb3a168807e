//! # rf-av
//!
//! ffmpeg orchestration for the reelforge assembly engine.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout,
//!   cancellation and diagnostic-line capture.
//! - **The transcoder seam** ([`Transcode`], [`FfmpegTranscoder`]) -- run and
//!   probe, with `time=` progress parsing.
//! - **Workspace management** ([`Workspace`]) -- scoped temporary directory
//!   with safe finalization.
//! - **Assembly components** -- [`clip`] synthesis, [`transition`] graph
//!   building, [`audio`] merge and music mixing, sequenced by [`Assembler`].

pub mod assemble;
pub mod audio;
pub mod clip;
pub mod command;
pub mod encoder;
pub mod probe;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tools;
pub mod transcoder;
pub mod transition;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use assemble::{Assembler, AssemblyStage};
pub use clip::{ClipPlan, ClipSynthesizer, Motion};
pub use command::{parse_time_marker, ToolCommand, ToolOutput};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use transcoder::{FfmpegTranscoder, Transcode};
pub use transition::{build_graph, TransitionGraph};
pub use workspace::Workspace;
