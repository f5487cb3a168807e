//! Upstream generation collaborators.
//!
//! The pipeline consumes text, speech and image generation through these
//! traits. HTTP implementations live in [`crate::backends`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

/// `GenerateText(prompt, model) -> string`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str, model: &str) -> rf_core::Result<String>;
}

/// `SynthesizeSpeech(text, voice, style?) -> wav bytes`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize_speech(
        &self,
        text: &str,
        voice: &str,
        style_instruction: Option<&str>,
    ) -> rf_core::Result<Vec<u8>>;
}

/// `SynthesizeImage(prompt, model, reference?) -> image bytes`.
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Whether several calls may be in flight at once. A local single-GPU
    /// service is not.
    fn is_concurrency_safe(&self) -> bool {
        true
    }

    /// Whether the service can condition generation on a reference image.
    fn supports_reference(&self) -> bool {
        true
    }

    async fn synthesize_image(
        &self,
        prompt: &str,
        model: &str,
        reference: Option<&Path>,
    ) -> rf_core::Result<Vec<u8>>;

    /// Generate from `reference`, moving at most `strength` away from it.
    async fn synthesize_image_with_reference(
        &self,
        prompt: &str,
        model: &str,
        reference: &Path,
        _strength: f64,
    ) -> rf_core::Result<Vec<u8>> {
        self.synthesize_image(prompt, model, Some(reference)).await
    }
}

/// One way of producing a scene image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageStrategy {
    /// Condition on a reference image.
    WithReference { strength: f64 },
    /// Prompt only.
    PromptOnly,
}

impl ImageStrategy {
    /// Strategies to try, in order. Reference-conditioned generation falls
    /// back to prompt-only.
    pub fn chain(has_reference: bool, strength: f64) -> Vec<ImageStrategy> {
        if has_reference {
            vec![ImageStrategy::WithReference { strength }, ImageStrategy::PromptOnly]
        } else {
            vec![ImageStrategy::PromptOnly]
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImageStrategy::WithReference { .. } => "with reference",
            ImageStrategy::PromptOnly => "prompt only",
        }
    }
}

/// The three upstream collaborators the orchestrator needs.
#[derive(Clone)]
pub struct Backends {
    pub text: Arc<dyn TextGenerator>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub image: Arc<dyn ImageSynthesizer>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("image", &self.image.name())
            .finish_non_exhaustive()
    }
}
