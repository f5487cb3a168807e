use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reelforge")]
#[command(author, version, about = "Narrated slideshow video generator")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Assemble a video from a JSON render request
    Assemble {
        /// Render request file (scene images, audio parts, output, music)
        #[arg(long, required = true)]
        request: PathBuf,

        /// Use the configured hardware encoder
        #[arg(long)]
        hw: bool,
    },

    /// Generate a full video for a topic: script, images, narration, assembly
    Run {
        /// Topic of the video
        #[arg(long, required = true)]
        topic: String,

        /// Category used to steer the script
        #[arg(long, default_value = "general")]
        category: String,

        /// Directory holding the project snapshot and generated artifacts
        #[arg(long, required = true)]
        work_dir: PathBuf,

        /// Cover image reused for the first and last scene
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Background music file
        #[arg(long)]
        bgm: Option<PathBuf>,

        /// Background music volume (0-1)
        #[arg(long, default_value = "0.15")]
        bgm_volume: f64,

        /// Background music fade in/out seconds
        #[arg(long, default_value = "2.0")]
        bgm_fade: f64,

        /// Condition each scene image on the previous one
        #[arg(long)]
        chaining: bool,

        /// Use the configured hardware encoder
        #[arg(long)]
        hw: bool,

        /// Output video path (defaults to <work-dir>/video.mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Probe a media file's duration
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Split a narration duration across scenes by text length
    Allocate {
        /// Narration duration in seconds
        #[arg(long, required = true)]
        duration: f64,

        /// Comma-separated scene text lengths
        #[arg(long, required = true, value_delimiter = ',')]
        lengths: Vec<usize>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
