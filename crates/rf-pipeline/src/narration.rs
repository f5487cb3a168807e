//! Narration synthesis, one audio file per part.
//!
//! Parts are independent and synthesized concurrently. Each finished part is
//! probed for its duration, which the caller feeds into scene duration
//! allocation. The first failed part cancels the others.

use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use rf_av::Transcode;
use rf_core::config::GenerationConfig;
use rf_core::{artifact_ready, PartSpec, Project, ProgressCounter};
use tokio_util::sync::CancellationToken;

use crate::artifact::write_artifact;
use crate::backend::SpeechSynthesizer;
use crate::retry::{with_retry, RetryPolicy};

/// A part whose narration file exists and has a known length.
#[derive(Debug, Clone, PartialEq)]
pub struct NarratedPart {
    pub part_number: u32,
    pub path: PathBuf,
    pub duration_secs: f64,
}

/// What the narration stage produced.
#[derive(Debug, Default)]
pub struct NarrationBatchResult {
    /// Finished parts in part order.
    pub completed: Vec<NarratedPart>,
    pub error: Option<rf_core::Error>,
}

pub struct NarrationGenerator {
    speech: Arc<dyn SpeechSynthesizer>,
    transcoder: Arc<dyn Transcode>,
    voice: String,
    style_instruction: Option<String>,
    policy: RetryPolicy,
}

impl NarrationGenerator {
    pub fn new(
        speech: Arc<dyn SpeechSynthesizer>,
        transcoder: Arc<dyn Transcode>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            speech,
            transcoder,
            voice: config.voice.clone(),
            style_instruction: config.style_instruction.clone(),
            policy: RetryPolicy::from_config(config),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Synthesize every part of `project` that has no narration yet.
    pub async fn generate(
        &self,
        project: &Project,
        progress: &ProgressCounter,
        cancel: &CancellationToken,
    ) -> NarrationBatchResult {
        let branch = cancel.child_token();
        let mut result = NarrationBatchResult::default();
        tracing::info!("Generating narration for {} parts", project.parts.len());

        let mut outcomes = stream::iter(project.parts.iter())
            .map(|part| {
                let dest = project.audio_path_for(part.part_number);
                let branch = &branch;
                async move { (part.part_number, self.narrate(part, dest, branch).await) }
            })
            .buffer_unordered(project.parts.len().max(1));

        while let Some((part_number, outcome)) = outcomes.next().await {
            match outcome {
                Ok(narrated) => {
                    result.completed.push(narrated);
                    progress.tick();
                }
                Err(e) => {
                    if e.is_cancelled() {
                        tracing::info!("part {part_number}: narration cancelled");
                    } else {
                        tracing::error!("part {part_number}: narration failed: {e}");
                    }
                    branch.cancel();
                    result.error = Some(e);
                    break;
                }
            }
        }
        drop(outcomes);

        result.completed.sort_by_key(|p| p.part_number);
        result
    }

    async fn narrate(
        &self,
        part: &PartSpec,
        dest: PathBuf,
        cancel: &CancellationToken,
    ) -> rf_core::Result<NarratedPart> {
        if artifact_ready(&dest) {
            let duration_secs = self.transcoder.probe_duration(&dest).await;
            if duration_secs > 0.0 {
                tracing::debug!("part {}: reusing {}", part.part_number, dest.display());
                return Ok(NarratedPart {
                    part_number: part.part_number,
                    path: dest,
                    duration_secs,
                });
            }
            tracing::warn!(
                "part {}: existing narration {} has no readable duration; regenerating",
                part.part_number,
                dest.display()
            );
        }

        let text = part.narration();
        if text.is_empty() {
            return Err(rf_core::Error::Validation(format!(
                "part {} has no narration text",
                part.part_number
            )));
        }

        let what = format!("part {} narration", part.part_number);
        let dest_ref = &dest;
        let text_ref = text.as_str();
        let duration_secs = with_retry(&self.policy, &what, cancel, |_| async move {
            let wav = self
                .speech
                .synthesize_speech(text_ref, &self.voice, self.style_instruction.as_deref())
                .await?;
            write_artifact(dest_ref, &wav, "speech").await?;
            let secs = self.transcoder.probe_duration(dest_ref).await;
            if secs <= 0.0 {
                return Err(rf_core::Error::backend(
                    "speech",
                    format!("synthesized audio {} has no readable duration", dest_ref.display()),
                ));
            }
            Ok(secs)
        })
        .await?;

        tracing::info!("part {}: narration {:.2}s", part.part_number, duration_secs);
        Ok(NarratedPart {
            part_number: part.part_number,
            path: dest,
            duration_secs,
        })
    }
}
