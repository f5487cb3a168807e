//! Reelforge - narrated slideshow video generation.
//!
//! The binary wires the [`rf_pipeline`] orchestrator and the [`rf_av`]
//! assembler to a command line. This library crate exposes config loading
//! for integration testing.

pub mod config;
