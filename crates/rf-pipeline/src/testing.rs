//! Recording fakes for the generation backends.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{ImageSynthesizer, SpeechSynthesizer, TextGenerator};

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Replies with a fixed-size scene list for every prompt.
#[derive(Debug)]
pub struct FakeText {
    scenes_per_part: usize,
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl FakeText {
    pub fn new(scenes_per_part: usize) -> Self {
        Self {
            scenes_per_part,
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with `raw`.
    pub fn replying(raw: impl Into<String>) -> Self {
        Self {
            scenes_per_part: 0,
            reply: Some(raw.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl TextGenerator for FakeText {
    async fn generate_text(&self, prompt: &str, _model: &str) -> rf_core::Result<String> {
        let call = {
            let mut prompts = self.prompts.lock();
            prompts.push(prompt.to_string());
            prompts.len()
        };
        if let Some(ref reply) = self.reply {
            return Ok(reply.clone());
        }
        let scenes: Vec<serde_json::Value> = (0..self.scenes_per_part)
            .map(|i| {
                serde_json::json!({
                    "text": format!("Part {call} scene {i} narration."),
                    "image_prompt": format!("picture {call}-{i}"),
                })
            })
            .collect();
        Ok(serde_json::json!({ "scenes": scenes }).to_string())
    }
}

/// Returns placeholder WAV bytes.
#[derive(Debug, Default)]
pub struct FakeSpeech {
    fail_when: Option<String>,
    delay: Duration,
    texts: Mutex<Vec<String>>,
}

impl FakeSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any text containing `needle`.
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_when = Some(needle.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.texts.lock().len()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize_speech(
        &self,
        text: &str,
        _voice: &str,
        _style_instruction: Option<&str>,
    ) -> rf_core::Result<Vec<u8>> {
        self.texts.lock().push(text.to_string());
        pause(self.delay).await;
        if let Some(ref needle) = self.fail_when {
            if text.contains(needle.as_str()) {
                return Err(rf_core::Error::backend("speech", "simulated TTS failure"));
            }
        }
        Ok(b"RIFF fake wav".to_vec())
    }
}

/// One recorded image call.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCall {
    pub prompt: String,
    pub reference: Option<PathBuf>,
}

/// Returns placeholder PNG bytes and tracks concurrency.
#[derive(Debug)]
pub struct FakeImages {
    concurrency_safe: bool,
    fail_all: bool,
    fail_with_reference: bool,
    reference_failures_left: AtomicUsize,
    fail_when: Option<String>,
    delay: Duration,
    calls: Mutex<Vec<ImageCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for FakeImages {
    fn default() -> Self {
        Self {
            concurrency_safe: true,
            fail_all: false,
            fail_with_reference: false,
            reference_failures_left: AtomicUsize::new(0),
            fail_when: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl FakeImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Reference-conditioned calls fail; prompt-only calls succeed.
    pub fn failing_with_reference(mut self) -> Self {
        self.fail_with_reference = true;
        self
    }

    /// The first `n` reference-conditioned calls fail; later ones succeed.
    pub fn failing_first_reference_calls(self, n: usize) -> Self {
        self.reference_failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Fail any prompt containing `needle`.
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_when = Some(needle.into());
        self
    }

    pub fn single_slot(mut self) -> Self {
        self.concurrency_safe = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<ImageCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn record(&self, prompt: &str, reference: Option<&Path>) -> rf_core::Result<Vec<u8>> {
        self.calls.lock().push(ImageCall {
            prompt: prompt.to_string(),
            reference: reference.map(Path::to_path_buf),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        pause(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let matched = self
            .fail_when
            .as_deref()
            .is_some_and(|needle| prompt.contains(needle));
        let transient = reference.is_some()
            && self
                .reference_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
        if self.fail_all || matched || transient || (self.fail_with_reference && reference.is_some()) {
            return Err(rf_core::Error::backend("image", "simulated image failure"));
        }
        Ok(format!("fake png: {prompt}").into_bytes())
    }
}

#[async_trait]
impl ImageSynthesizer for FakeImages {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn is_concurrency_safe(&self) -> bool {
        self.concurrency_safe
    }

    async fn synthesize_image(
        &self,
        prompt: &str,
        _model: &str,
        reference: Option<&Path>,
    ) -> rf_core::Result<Vec<u8>> {
        self.record(prompt, reference).await
    }
}
