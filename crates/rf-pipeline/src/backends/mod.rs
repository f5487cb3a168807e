//! HTTP implementations of the generation backends.
//!
//! - [`openai`]: OpenAI-compatible chat completion, speech and image APIs.
//! - [`sdwebui`]: a local Stable Diffusion WebUI (`txt2img` / `img2img`).

pub mod openai;
pub mod sdwebui;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use rf_core::config::{Config, ImageBackendKind};

use crate::backend::{Backends, ImageSynthesizer};
pub use openai::{OpenAiImages, OpenAiSpeech, OpenAiText};
pub use sdwebui::SdWebUi;

/// Characters of an error body kept in a [`rf_core::Error::Backend`] message.
const ERROR_BODY_LIMIT: usize = 300;

/// Build the shared client for one backend.
pub(crate) fn http_client(timeout: Duration) -> rf_core::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| rf_core::Error::Internal(format!("failed to build HTTP client: {e}")))
}

/// POST `body` as JSON and return the response if its status is a success.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &serde_json::Value,
    backend: &str,
) -> rf_core::Result<reqwest::Response> {
    let mut request = client.post(url).json(body);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    let resp = request
        .send()
        .await
        .map_err(|e| rf_core::Error::backend(backend, format!("request to {url} failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        let snippet: String = text.chars().take(ERROR_BODY_LIMIT).collect();
        return Err(rf_core::Error::backend(backend, format!("{url} returned {status}: {snippet}")));
    }
    Ok(resp)
}

/// Parse a JSON response body into `T`.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    backend: &str,
) -> rf_core::Result<T> {
    resp.json::<T>()
        .await
        .map_err(|e| rf_core::Error::backend(backend, format!("unexpected response body: {e}")))
}

pub(crate) fn decode_base64(data: &str, backend: &str) -> rf_core::Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| rf_core::Error::backend(backend, format!("invalid base64 payload: {e}")))
}

pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

impl Backends {
    /// HTTP backends configured from `config`.
    pub fn from_config(config: &Config) -> rf_core::Result<Self> {
        let ep = &config.endpoints;
        let gen = &config.generation;
        let timeout = ep.request_timeout();

        let text = OpenAiText::new(&ep.text_base_url, ep.text_api_key.clone(), timeout)?;
        let speech = OpenAiSpeech::new(
            &ep.speech_base_url,
            ep.speech_api_key.clone(),
            &gen.speech_model,
            timeout,
        )?;
        let image: Arc<dyn ImageSynthesizer> = match gen.backend {
            ImageBackendKind::Local => Arc::new(
                SdWebUi::new(&ep.local_image_url, timeout)?.with_checkpoint(gen.local_checkpoint.clone()),
            ),
            ImageBackendKind::Cloud => Arc::new(OpenAiImages::new(
                &ep.image_base_url,
                ep.image_api_key.clone(),
                timeout,
            )?),
        };

        tracing::debug!(
            "backends: text={} speech={} image={}",
            ep.text_base_url,
            ep.speech_base_url,
            image.name()
        );

        Ok(Self {
            text: Arc::new(text),
            speech: Arc::new(speech),
            image,
        })
    }
}
