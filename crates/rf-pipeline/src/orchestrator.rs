//! Top-level generation pipeline.
//!
//! `ScriptGeneration -> {ImageGeneration || AudioGeneration} -> Verification
//! -> Assembly -> Done`, with any stage able to end the run as `Aborted`.
//! The run reports a [`GenerationOutcome`] rather than an error so callers
//! can render partial progress and resume later.
//!
//! Progress ranges: script 0-10, media 10-60, assembly 60-100.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rf_av::{Assembler, Transcode};
use rf_core::config::Config;
use rf_core::{
    BgmSpec, GenerationOutcome, PipelineStage, PipelineState, ProgressAggregator, Project,
    StageProgress, StageRecord,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::Backends;
use crate::images::{ImageBatchResult, ImageGenerator};
use crate::narration::{NarrationBatchResult, NarrationGenerator};
use crate::retry::{with_retry, RetryPolicy};
use crate::script::{parse_part, script_prompt};

const SCRIPT_RANGE: (f64, f64) = (0.0, 10.0);
const MEDIA_RANGE: (f64, f64) = (10.0, 60.0);
const ASSEMBLY_RANGE: (f64, f64) = (60.0, 100.0);

const IMAGE_FAILED: u8 = 1;
const AUDIO_FAILED: u8 = 2;

/// Assembly settings for a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Defaults to `<work_dir>/video.mp4`.
    pub output_path: Option<PathBuf>,
    pub use_hardware_encode: bool,
    pub bgm: Option<BgmSpec>,
}

pub struct Orchestrator {
    config: Config,
    backends: Backends,
    transcoder: Arc<dyn Transcode>,
    progress: ProgressAggregator,
    state: Mutex<PipelineState>,
    options: PipelineOptions,
    retry: Option<RetryPolicy>,
}

impl Orchestrator {
    pub fn new(config: Config, backends: Backends, transcoder: Arc<dyn Transcode>) -> Self {
        Self {
            config,
            backends,
            transcoder,
            progress: ProgressAggregator::new(),
            state: Mutex::new(PipelineState::new()),
            options: PipelineOptions::default(),
            retry: None,
        }
    }

    /// Report into `progress` instead of a private aggregator.
    pub fn with_progress(mut self, progress: ProgressAggregator) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the retry policy of every generation stage.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn progress(&self) -> &ProgressAggregator {
        &self.progress
    }

    /// Elapsed-time ticks for display.
    pub fn ticker(&self, period: Duration) -> watch::Receiver<Duration> {
        self.state.lock().ticker(period)
    }

    pub fn current_stage(&self) -> Option<PipelineStage> {
        self.state.lock().current()
    }

    pub fn completed_stages(&self) -> Vec<StageRecord> {
        self.state.lock().completed().to_vec()
    }

    fn policy(&self) -> RetryPolicy {
        self.retry
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config.generation))
    }

    fn begin(&self, stage: PipelineStage) {
        tracing::info!("Stage: {stage}");
        self.state.lock().begin(stage);
    }

    fn stage(&self, range: (f64, f64), stage: PipelineStage) -> StageProgress {
        self.progress.stage(range.0, range.1, stage.name())
    }

    fn image_generator(&self) -> ImageGenerator {
        ImageGenerator::new(self.backends.image.clone(), self.config.generation.clone())
            .with_policy(self.policy())
    }

    fn narration_generator(&self) -> NarrationGenerator {
        NarrationGenerator::new(
            self.backends.speech.clone(),
            self.transcoder.clone(),
            &self.config.generation,
        )
        .with_policy(self.policy())
    }

    /// Run every stage and report what was achieved.
    pub async fn run_full_pipeline(
        &self,
        project: &mut Project,
        cancel: &CancellationToken,
    ) -> GenerationOutcome {
        tracing::info!("Pipeline started: \"{}\" in {}", project.topic, project.work_dir.display());
        let result = self.run_stages(project, cancel).await;
        self.state.lock().finish();

        match result {
            Ok(output) => {
                self.progress.report(100.0, PipelineStage::Done.name());
                tracing::info!("Pipeline finished: {}", output.display());
                GenerationOutcome::success(project, output)
            }
            Err(e) => {
                if e.is_cancelled() {
                    tracing::info!("Pipeline cancelled");
                } else {
                    tracing::error!("Pipeline aborted: {e}");
                }
                GenerationOutcome::failure(project, &e)
            }
        }
    }

    async fn run_stages(&self, project: &mut Project, cancel: &CancellationToken) -> rf_core::Result<PathBuf> {
        self.begin(PipelineStage::ScriptGeneration);
        let stage = self.stage(SCRIPT_RANGE, PipelineStage::ScriptGeneration);
        if project.parts.is_empty() {
            self.generate_script(project, &stage, cancel).await?;
            save_snapshot(project);
        } else {
            tracing::info!("Script present ({} parts); skipping", project.parts.len());
        }
        stage.complete();

        self.begin(PipelineStage::MediaGeneration);
        let stage = self.stage(MEDIA_RANGE, PipelineStage::MediaGeneration);
        let media = self.generate_media(project, &stage, cancel).await;
        save_snapshot(project);
        media?;
        stage.complete();

        self.begin(PipelineStage::Verification);
        verify(project)?;

        self.begin(PipelineStage::Assembly);
        let stage = self.stage(ASSEMBLY_RANGE, PipelineStage::Assembly);
        let output = self
            .options
            .output_path
            .clone()
            .unwrap_or_else(|| project.work_dir.join("video.mp4"));
        let request = project.render_request(output, self.options.use_hardware_encode, self.options.bgm.clone())?;
        let assembler = Assembler::new(self.transcoder.clone(), self.config.render.clone());
        let output = assembler.assemble(&request, &stage, cancel).await?;
        save_snapshot(project);
        Ok(output)
    }

    /// Ask the text backend for every part's scenes, numbering scenes across
    /// parts.
    pub async fn generate_script(
        &self,
        project: &mut Project,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> rf_core::Result<()> {
        let parts = self.config.generation.parts.max(1);
        let model = self.config.generation.text_model.as_str();
        let policy = self.policy();
        let mut generated = Vec::with_capacity(parts as usize);
        let mut next_index = 0;

        for part_number in 1..=parts {
            let prompt = script_prompt(&project.topic, &project.category, part_number, parts);
            let what = format!("part {part_number} script");
            let prompt_ref = prompt.as_str();
            let part = with_retry(&policy, &what, cancel, |_| async move {
                let raw = self.backends.text.generate_text(prompt_ref, model).await?;
                parse_part(&raw, part_number, next_index)
            })
            .await?;
            tracing::info!("part {part_number}: {} scenes", part.scenes.len());
            next_index += part.scenes.len();
            generated.push(part);
            progress.report_count(part_number as usize, parts as usize);
        }

        project.parts = generated;
        Ok(())
    }

    /// Images and narration concurrently. The first branch to fail for real
    /// cancels the other; its error is the one reported.
    async fn generate_media(
        &self,
        project: &mut Project,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> rf_core::Result<()> {
        let branch = cancel.child_token();
        let counter = progress.counter(project.scene_count() + project.parts.len());
        let images = self.image_generator();
        let narration = self.narration_generator();
        let first_failure = AtomicU8::new(0);

        let (image_result, audio_result) = {
            let snapshot: &Project = &*project;
            let image_branch = async {
                let result = images.generate(snapshot, &counter, &branch).await;
                flag_failure(&result.error, IMAGE_FAILED, &first_failure, &branch);
                result
            };
            let audio_branch = async {
                let result = narration.generate(snapshot, &counter, &branch).await;
                flag_failure(&result.error, AUDIO_FAILED, &first_failure, &branch);
                result
            };
            tokio::join!(image_branch, audio_branch)
        };

        apply_media(project, &image_result, &audio_result);
        pick_error(first_failure.load(Ordering::SeqCst), image_result.error, audio_result.error)
            .map_or(Ok(()), Err)
    }

    /// The image stage on its own.
    pub async fn generate_all_images(&self, project: &mut Project, cancel: &CancellationToken) -> rf_core::Result<()> {
        self.begin(PipelineStage::ImageGeneration);
        let stage = self.progress.stage(0.0, 100.0, PipelineStage::ImageGeneration.name());
        let counter = stage.counter(project.scene_count());
        let result = self.image_generator().generate(project, &counter, cancel).await;
        apply_media(project, &result, &NarrationBatchResult::default());
        save_snapshot(project);
        self.state.lock().finish();
        result.error.map_or(Ok(()), Err)
    }

    /// The narration stage on its own.
    pub async fn generate_all_audio(&self, project: &mut Project, cancel: &CancellationToken) -> rf_core::Result<()> {
        self.begin(PipelineStage::AudioGeneration);
        let stage = self.progress.stage(0.0, 100.0, PipelineStage::AudioGeneration.name());
        let counter = stage.counter(project.parts.len());
        let result = self.narration_generator().generate(project, &counter, cancel).await;
        apply_media(project, &ImageBatchResult::default(), &result);
        save_snapshot(project);
        self.state.lock().finish();
        result.error.map_or(Ok(()), Err)
    }
}

fn flag_failure(error: &Option<rf_core::Error>, who: u8, first: &AtomicU8, branch: &CancellationToken) {
    if let Some(e) = error {
        if !e.is_cancelled() {
            let _ = first.compare_exchange(0, who, Ordering::SeqCst, Ordering::SeqCst);
            branch.cancel();
        }
    }
}

/// The error to report after both branches finished.
fn pick_error(
    first: u8,
    image: Option<rf_core::Error>,
    audio: Option<rf_core::Error>,
) -> Option<rf_core::Error> {
    match first {
        IMAGE_FAILED => image,
        AUDIO_FAILED => audio,
        _ => image.or(audio),
    }
}

fn apply_media(project: &mut Project, images: &ImageBatchResult, audio: &NarrationBatchResult) {
    for (index, path) in &images.completed {
        if let Some(scene) = project.scene_mut(*index) {
            scene.image_path = Some(path.clone());
        }
    }
    for narrated in &audio.completed {
        if let Some(part) = project.parts.iter_mut().find(|p| p.part_number == narrated.part_number) {
            part.set_audio(narrated.path.clone(), narrated.duration_secs);
        }
    }
}

/// Confirm every scene has an image and every part has narration.
pub fn verify(project: &Project) -> rf_core::Result<()> {
    let total_images = project.scene_count();
    let total_audio = project.parts.len();
    let missing_images = total_images - project.scenes_with_images();
    let missing_audio = total_audio - project.parts_with_audio();
    if missing_images > 0 || missing_audio > 0 {
        return Err(rf_core::Error::VerificationDeficiency {
            missing_images,
            total_images,
            missing_audio,
            total_audio,
        });
    }
    if project.parts.is_empty() {
        return Err(rf_core::Error::pipeline("verification", "project has no scenes to assemble"));
    }
    Ok(())
}

fn save_snapshot(project: &Project) {
    if let Err(e) = project.save_snapshot() {
        tracing::warn!("Failed to write project snapshot: {e}");
    }
}
