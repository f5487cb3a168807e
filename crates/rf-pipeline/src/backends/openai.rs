//! OpenAI-compatible text, speech and image clients.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{decode_base64, http_client, post_json, read_json, trim_base};
use crate::backend::{ImageSynthesizer, SpeechSynthesizer, TextGenerator};

/// Frame size requested from the cloud image API (16:9).
const CLOUD_IMAGE_SIZE: &str = "1792x1024";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// `POST {base}/chat/completions`.
pub struct OpenAiText {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiText {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> rf_core::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: trim_base(base_url),
            api_key,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiText {
    async fn generate_text(&self, prompt: &str, model: &str) -> rf_core::Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let resp = post_json(&self.client, &url, self.api_key.as_deref(), &body, "text").await?;
        let chat: ChatResponse = read_json(resp, "text").await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| rf_core::Error::backend("text", "completion has no content"))
    }
}

// ---------------------------------------------------------------------------
// Speech
// ---------------------------------------------------------------------------

/// `POST {base}/audio/speech`, WAV output.
pub struct OpenAiSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiSpeech {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        timeout: Duration,
    ) -> rf_core::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: trim_base(base_url),
            api_key,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize_speech(
        &self,
        text: &str,
        voice: &str,
        style_instruction: Option<&str>,
    ) -> rf_core::Result<Vec<u8>> {
        let url = format!("{}/audio/speech", self.base_url);
        let mut body = json!({
            "model": self.model,
            "input": text,
            "voice": voice,
            "response_format": "wav",
        });
        if let Some(style) = style_instruction {
            body["instructions"] = json!(style);
        }
        let resp = post_json(&self.client, &url, self.api_key.as_deref(), &body, "speech").await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| rf_core::Error::backend("speech", format!("reading audio body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// `POST {base}/images/generations`, base64 output. Prompt-only.
pub struct OpenAiImages {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiImages {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> rf_core::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: trim_base(base_url),
            api_key,
        })
    }
}

#[async_trait]
impl ImageSynthesizer for OpenAiImages {
    fn name(&self) -> &'static str {
        "openai-images"
    }

    fn supports_reference(&self) -> bool {
        false
    }

    async fn synthesize_image(
        &self,
        prompt: &str,
        model: &str,
        reference: Option<&Path>,
    ) -> rf_core::Result<Vec<u8>> {
        if let Some(reference) = reference {
            tracing::debug!("openai-images ignores reference {}", reference.display());
        }
        let url = format!("{}/images/generations", self.base_url);
        let body = json!({
            "model": model,
            "prompt": prompt,
            "n": 1,
            "size": CLOUD_IMAGE_SIZE,
            "response_format": "b64_json",
        });
        let resp = post_json(&self.client, &url, self.api_key.as_deref(), &body, "image").await?;
        let images: ImagesResponse = read_json(resp, "image").await?;
        let encoded = images
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| rf_core::Error::backend("image", "response has no image data"))?;
        decode_base64(&encoded, "image")
    }
}
