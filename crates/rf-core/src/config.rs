//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries all
//! sub-configs for tools, rendering, generation and HTTP endpoints. Every
//! section defaults sensibly so a completely empty file is valid.
//!
//! A `Config` is immutable once loaded and is handed to each component's
//! constructor; there is no process-wide settings object.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub render: RenderConfig,
    pub generation: GenerationConfig,
    pub endpoints: EndpointsConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.render.fps == 0 {
            warnings.push("render.fps is 0; clips cannot be synthesized".into());
        }
        if self.render.transition_secs < 0.0 {
            warnings.push("render.transition_secs is negative".into());
        }
        if self.render.clip_concurrency == 0 {
            warnings.push("render.clip_concurrency is 0; treated as 1".into());
        }
        if self.render.zoom_max < 1.0 {
            warnings.push(format!(
                "render.zoom_max {} is below 1.0; zoom clips will crop outside the frame",
                self.render.zoom_max
            ));
        }

        let valid = ["none", "videotoolbox", "nvenc", "qsv", "amf"];
        if !valid.contains(&self.render.hw_accel.as_str()) {
            warnings.push(format!(
                "render.hw_accel '{}' is not a recognized method (valid: {})",
                self.render.hw_accel,
                valid.join(", ")
            ));
        }

        if self.generation.max_attempts == 0 {
            warnings.push("generation.max_attempts is 0; treated as 1".into());
        }
        if self.generation.max_consecutive_failures == 0 {
            warnings.push("generation.max_consecutive_failures is 0; treated as 1".into());
        }
        if !(0.0..=1.0).contains(&self.generation.reference_strength) {
            warnings.push(format!(
                "generation.reference_strength {} is outside [0, 1]",
                self.generation.reference_strength
            ));
        }
        if let Some(ref reference) = self.generation.reference_image {
            if !reference.exists() {
                warnings.push(format!(
                    "generation.reference_image {} does not exist",
                    reference.display()
                ));
            }
        }

        if self.generation.backend == ImageBackendKind::Cloud
            && self.endpoints.image_api_key.is_none()
        {
            warnings.push("cloud image backend selected but endpoints.image_api_key is not set".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// Request-level budget for a single transcoder invocation.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            timeout_secs: 3600,
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Video assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub fps: u32,
    /// Cross-fade length between consecutive clips.
    pub transition_secs: f64,
    /// Size of the clip synthesis pool.
    pub clip_concurrency: usize,
    /// Resolution images are upscaled to before pan/zoom.
    pub working_width: u32,
    pub working_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    /// Zoom factor at the tight end of a zoom clip.
    pub zoom_max: f64,
    pub video_preset: String,
    pub video_crf: u32,
    /// Hardware method used when a request asks for hardware encoding.
    pub hw_accel: String,
    pub audio_bitrate: String,
    pub ducking: DuckingConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            transition_secs: 1.0,
            clip_concurrency: 4,
            working_width: 3840,
            working_height: 2160,
            output_width: 1920,
            output_height: 1080,
            zoom_max: 1.15,
            video_preset: "medium".into(),
            video_crf: 20,
            hw_accel: "nvenc".into(),
            audio_bitrate: "192k".into(),
            ducking: DuckingConfig::default(),
        }
    }
}

/// Sidechain compressor policy for background-music ducking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckingConfig {
    /// Linear threshold; low enough that any speech triggers it.
    pub threshold: f64,
    pub ratio: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
}

impl Default for DuckingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            ratio: 4.0,
            attack_ms: 200.0,
            release_ms: 1000.0,
        }
    }
}

/// Which image synthesis backend family is in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackendKind {
    /// A local single-GPU service.
    #[default]
    Local,
    /// A hosted API.
    Cloud,
}

/// Upstream generation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Condition each scene on the previous scene's image.
    pub chaining: bool,
    pub backend: ImageBackendKind,
    /// Attempts per scene image (and per narration part).
    pub max_attempts: u32,
    /// Linear backoff step: attempt `n` waits `n * backoff_base_secs`.
    pub backoff_base_secs: f64,
    /// Consecutive failed scenes that abort the image stage.
    pub max_consecutive_failures: usize,
    pub local_concurrency: usize,
    pub cloud_concurrency: usize,
    /// Cover image reused for the first and last scene.
    pub reference_image: Option<PathBuf>,
    /// How far a referenced generation may move away from its reference.
    pub reference_strength: f64,
    pub consistency_prefix: String,
    pub parts: u32,
    pub text_model: String,
    /// Model name sent to the cloud image service.
    pub image_model: String,
    /// Stable Diffusion checkpoint for the local service; unset keeps the
    /// server's loaded model.
    pub local_checkpoint: Option<String>,
    pub speech_model: String,
    pub voice: String,
    pub style_instruction: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            chaining: false,
            backend: ImageBackendKind::Local,
            max_attempts: 3,
            backoff_base_secs: 2.0,
            max_consecutive_failures: 3,
            local_concurrency: 3,
            cloud_concurrency: 2,
            reference_image: None,
            reference_strength: 0.35,
            consistency_prefix:
                "Keep the same characters, palette and art style as the reference image. ".into(),
            parts: 3,
            text_model: "gpt-4o-mini".into(),
            image_model: "dall-e-3".into(),
            local_checkpoint: None,
            speech_model: "gpt-4o-mini-tts".into(),
            voice: "alloy".into(),
            style_instruction: None,
        }
    }
}

impl GenerationConfig {
    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64((self.backoff_base_secs * attempt as f64).max(0.0))
    }

    /// Pool size for independent (non-chained) image generation.
    pub fn independent_concurrency(&self) -> usize {
        let n = match self.backend {
            ImageBackendKind::Local => self.local_concurrency,
            ImageBackendKind::Cloud => self.cloud_concurrency,
        };
        n.max(1)
    }
}

/// HTTP endpoints for the upstream generation backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub text_base_url: String,
    pub text_api_key: Option<String>,
    pub speech_base_url: String,
    pub speech_api_key: Option<String>,
    pub local_image_url: String,
    pub image_base_url: String,
    pub image_api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            text_base_url: "https://api.openai.com/v1".into(),
            text_api_key: None,
            speech_base_url: "https://api.openai.com/v1".into(),
            speech_api_key: None,
            local_image_url: "http://127.0.0.1:7860".into(),
            image_base_url: "https://api.openai.com/v1".into(),
            image_api_key: None,
            request_timeout_secs: 120,
        }
    }
}

impl EndpointsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
