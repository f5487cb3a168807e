//! # rf-pipeline
//!
//! The generation pipeline for reelforge: script generation, scene images,
//! narration, verification and hand-off to [`rf_av::Assembler`].
//!
//! Upstream services are reached through the [`backend`] traits; the HTTP
//! clients in [`backends`] implement them. [`Orchestrator`] sequences the
//! stages and reports a [`rf_core::GenerationOutcome`].

pub mod artifact;
pub mod backend;
pub mod backends;
pub mod images;
pub mod narration;
pub mod orchestrator;
pub mod retry;
pub mod script;
#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Backends, ImageStrategy, ImageSynthesizer, SpeechSynthesizer, TextGenerator};
pub use images::{ImageBatchResult, ImageGenerator};
pub use narration::{NarratedPart, NarrationBatchResult, NarrationGenerator};
pub use orchestrator::{verify, Orchestrator, PipelineOptions};
pub use retry::RetryPolicy;
