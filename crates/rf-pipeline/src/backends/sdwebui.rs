//! Stable Diffusion WebUI client.
//!
//! A single local GPU serves one request at a time, so the client reports
//! itself as not concurrency-safe and callers serialize through a gate.
//!
//! The `model` argument of [`ImageSynthesizer`] names a cloud model and is
//! ignored here. The server keeps whatever checkpoint it has loaded unless one
//! is configured with [`SdWebUi::with_checkpoint`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{decode_base64, encode_base64, http_client, post_json, read_json, trim_base};
use crate::backend::ImageSynthesizer;

const WIDTH: u32 = 1344;
const HEIGHT: u32 = 768;
const STEPS: u32 = 30;
/// img2img strength when the caller gives none.
const DEFAULT_DENOISING: f64 = 0.5;

#[derive(Debug, Deserialize)]
struct SdResponse {
    images: Vec<String>,
}

/// `POST {url}/sdapi/v1/txt2img` and `/sdapi/v1/img2img`.
pub struct SdWebUi {
    client: reqwest::Client,
    base_url: String,
    checkpoint: Option<String>,
}

impl SdWebUi {
    pub fn new(base_url: &str, timeout: Duration) -> rf_core::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: trim_base(base_url),
            checkpoint: None,
        })
    }

    /// Switch the server to `checkpoint` for every request.
    pub fn with_checkpoint(mut self, checkpoint: Option<String>) -> Self {
        self.checkpoint = checkpoint.filter(|c| !c.trim().is_empty());
        self
    }

    async fn call(&self, endpoint: &str, mut body: serde_json::Value) -> rf_core::Result<Vec<u8>> {
        if let Some(ref checkpoint) = self.checkpoint {
            body["override_settings"] = json!({ "sd_model_checkpoint": checkpoint });
        }
        let url = format!("{}/sdapi/v1/{endpoint}", self.base_url);
        let resp = post_json(&self.client, &url, None, &body, "image").await?;
        let sd: SdResponse = read_json(resp, "image").await?;
        let first = sd
            .images
            .into_iter()
            .next()
            .ok_or_else(|| rf_core::Error::backend("image", format!("{endpoint} returned no images")))?;
        decode_base64(&first, "image")
    }

    async fn img2img(&self, prompt: &str, reference: &Path, strength: f64) -> rf_core::Result<Vec<u8>> {
        let init = tokio::fs::read(reference).await?;
        let body = json!({
            "prompt": prompt,
            "init_images": [encode_base64(&init)],
            "denoising_strength": strength,
            "width": WIDTH,
            "height": HEIGHT,
            "steps": STEPS,
        });
        self.call("img2img", body).await
    }
}

#[async_trait]
impl ImageSynthesizer for SdWebUi {
    fn name(&self) -> &'static str {
        "sdwebui"
    }

    fn is_concurrency_safe(&self) -> bool {
        false
    }

    async fn synthesize_image(
        &self,
        prompt: &str,
        _model: &str,
        reference: Option<&Path>,
    ) -> rf_core::Result<Vec<u8>> {
        if let Some(reference) = reference {
            return self.img2img(prompt, reference, DEFAULT_DENOISING).await;
        }
        let body = json!({
            "prompt": prompt,
            "width": WIDTH,
            "height": HEIGHT,
            "steps": STEPS,
        });
        self.call("txt2img", body).await
    }

    async fn synthesize_image_with_reference(
        &self,
        prompt: &str,
        _model: &str,
        reference: &Path,
        strength: f64,
    ) -> rf_core::Result<Vec<u8>> {
        self.img2img(prompt, reference, strength).await
    }
}
