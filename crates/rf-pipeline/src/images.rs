//! Scene image generation.
//!
//! Scenes are visited in sequence order. A scene whose image already exists
//! at its deterministic path is skipped. With a cover image configured, the
//! first and last scene reuse it verbatim. Everything else is synthesized,
//! either sequentially with each scene conditioned on the previous image
//! (chaining) or through a bounded pool.
//!
//! A scene that exhausts its attempts is left without an image and the batch
//! moves on; the verification gate reports it later. Reaching
//! `max_consecutive_failures` failed scenes in a row aborts the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use rf_core::config::GenerationConfig;
use rf_core::{artifact_ready, Project, ProgressCounter};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::artifact::{copy_artifact, write_artifact};
use crate::backend::{ImageStrategy, ImageSynthesizer};
use crate::retry::{cancellable, with_retry, RetryPolicy};

/// What the image stage produced.
#[derive(Debug, Default)]
pub struct ImageBatchResult {
    /// `(scene index, image path)` for every scene that has an image, in
    /// scene order.
    pub completed: Vec<(usize, PathBuf)>,
    /// Why the batch stopped early, if it did.
    pub error: Option<rf_core::Error>,
}

#[derive(Debug, Clone)]
struct SceneJob {
    index: usize,
    prompt: String,
    dest: PathBuf,
}

enum Plan {
    Existing(PathBuf),
    Bookend { reference: PathBuf, dest: PathBuf },
    Synthesize(SceneJob),
}

/// Counts failed scenes in a row; a success resets it.
struct FailureStreak {
    current: usize,
    limit: usize,
}

impl FailureStreak {
    fn new(limit: usize) -> Self {
        Self {
            current: 0,
            limit: limit.max(1),
        }
    }

    fn success(&mut self) {
        self.current = 0;
    }

    /// Record a failure; returns the abort error once the limit is reached.
    fn failure(&mut self) -> Option<rf_core::Error> {
        self.current += 1;
        (self.current >= self.limit).then(|| {
            rf_core::Error::backend(
                "image",
                format!("{} consecutive scene failures; aborting image generation", self.current),
            )
        })
    }
}

pub struct ImageGenerator {
    backend: Arc<dyn ImageSynthesizer>,
    config: GenerationConfig,
    policy: RetryPolicy,
    /// Single-slot gate for backends that cannot serve parallel requests.
    gate: Option<Semaphore>,
}

impl ImageGenerator {
    pub fn new(backend: Arc<dyn ImageSynthesizer>, config: GenerationConfig) -> Self {
        let gate = (!backend.is_concurrency_safe()).then(|| Semaphore::new(1));
        let policy = RetryPolicy::from_config(&config);
        Self {
            backend,
            config,
            policy,
            gate,
        }
    }

    /// Override the retry policy (tests use a short backoff).
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Decide, in scene order, how each scene gets its image.
    fn plan(&self, project: &Project) -> Vec<(usize, Plan)> {
        let total = project.scene_count();
        project
            .scenes()
            .enumerate()
            .map(|(position, scene)| {
                let dest = project.image_path_for(scene.index);
                let plan = if let Some(existing) = scene.image_path.as_ref().filter(|p| artifact_ready(p)) {
                    Plan::Existing(existing.clone())
                } else if artifact_ready(&dest) {
                    Plan::Existing(dest)
                } else {
                    let bookend = position == 0 || position + 1 == total;
                    match project.reference_image {
                        Some(ref reference) if bookend => Plan::Bookend {
                            reference: reference.clone(),
                            dest,
                        },
                        _ => Plan::Synthesize(SceneJob {
                            index: scene.index,
                            prompt: scene.image_prompt.clone(),
                            dest,
                        }),
                    }
                };
                (scene.index, plan)
            })
            .collect()
    }

    /// Generate every missing scene image of `project`.
    pub async fn generate(
        &self,
        project: &Project,
        progress: &ProgressCounter,
        cancel: &CancellationToken,
    ) -> ImageBatchResult {
        let plans = self.plan(project);
        tracing::info!(
            "Generating images for {} scenes ({} mode, backend {})",
            plans.len(),
            if self.config.chaining { "chained" } else { "independent" },
            self.backend.name()
        );

        if self.config.chaining {
            self.generate_chained(plans, progress, cancel).await
        } else {
            self.generate_independent(plans, progress, cancel).await
        }
    }

    async fn generate_chained(
        &self,
        plans: Vec<(usize, Plan)>,
        progress: &ProgressCounter,
        cancel: &CancellationToken,
    ) -> ImageBatchResult {
        let mut result = ImageBatchResult::default();
        let mut streak = FailureStreak::new(self.config.max_consecutive_failures);
        let mut previous: Option<PathBuf> = None;

        for (index, plan) in plans {
            let outcome = match plan {
                Plan::Existing(path) => Ok(path),
                Plan::Bookend { reference, dest } => match self.copy_bookend(index, &reference, &dest).await {
                    Ok(path) => Ok(path),
                    Err(e) => {
                        result.error = Some(e);
                        return result;
                    }
                },
                Plan::Synthesize(job) => self.synthesize_scene(&job, previous.as_deref(), cancel).await,
            };
            match outcome {
                Ok(path) => {
                    streak.success();
                    previous = Some(path.clone());
                    result.completed.push((index, path));
                }
                Err(e) if e.is_cancelled() => {
                    result.error = Some(e);
                    return result;
                }
                Err(e) => {
                    tracing::warn!("scene {index}: no image: {e}");
                    if let Some(abort) = streak.failure() {
                        tracing::error!("{abort}");
                        result.error = Some(abort);
                        return result;
                    }
                }
            }
            progress.tick();
        }
        result
    }

    async fn generate_independent(
        &self,
        plans: Vec<(usize, Plan)>,
        progress: &ProgressCounter,
        cancel: &CancellationToken,
    ) -> ImageBatchResult {
        let mut result = ImageBatchResult::default();
        let mut streak = FailureStreak::new(self.config.max_consecutive_failures);

        let mut pending = Vec::new();
        for (index, plan) in plans {
            match plan {
                Plan::Existing(path) => {
                    result.completed.push((index, path));
                    progress.tick();
                }
                Plan::Bookend { reference, dest } => {
                    match self.copy_bookend(index, &reference, &dest).await {
                        Ok(path) => result.completed.push((index, path)),
                        Err(e) => {
                            result.error = Some(e);
                            return result;
                        }
                    }
                    progress.tick();
                }
                Plan::Synthesize(job) => pending.push(job),
            }
        }

        let mut outcomes = stream::iter(pending)
            .map(|job| async move {
                let outcome = self.synthesize_scene(&job, None, cancel).await;
                (job.index, outcome)
            })
            .buffer_unordered(self.config.independent_concurrency());

        while let Some((index, outcome)) = outcomes.next().await {
            match outcome {
                Ok(path) => {
                    streak.success();
                    result.completed.push((index, path));
                }
                Err(e) if e.is_cancelled() => {
                    result.error = Some(e);
                    break;
                }
                Err(e) => {
                    tracing::warn!("scene {index}: no image: {e}");
                    if let Some(abort) = streak.failure() {
                        tracing::error!("{abort}");
                        result.error = Some(abort);
                        break;
                    }
                }
            }
            progress.tick();
        }

        result.completed.sort_by_key(|(index, _)| *index);
        result
    }

    async fn copy_bookend(&self, index: usize, reference: &Path, dest: &Path) -> rf_core::Result<PathBuf> {
        tracing::debug!("scene {index}: reusing cover image {}", reference.display());
        copy_artifact(reference, dest).await?;
        Ok(dest.to_path_buf())
    }

    /// Synthesize one scene and write it to its path.
    ///
    /// Each strategy in the chain gets the full retry budget; the next one is
    /// tried only after the previous has exhausted its attempts.
    async fn synthesize_scene(
        &self,
        job: &SceneJob,
        reference: Option<&Path>,
        cancel: &CancellationToken,
    ) -> rf_core::Result<PathBuf> {
        let reference = reference.filter(|_| self.backend.supports_reference());
        let strategies = ImageStrategy::chain(reference.is_some(), self.config.reference_strength);
        let mut last_error = None;

        for strategy in strategies {
            let what = format!("scene {} image ({})", job.index, strategy.name());
            let result = with_retry(&self.policy, &what, cancel, |_| async move {
                let bytes = self.attempt(job, strategy, reference, cancel).await?;
                write_artifact(&job.dest, &bytes, self.backend.name()).await?;
                Ok(job.dest.clone())
            })
            .await;
            match result {
                Ok(path) => return Ok(path),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!("scene {}: {} generation failed: {e}", job.index, strategy.name());
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| rf_core::Error::backend("image", "no generation strategy available")))
    }

    /// One backend call for `strategy`, holding the single-slot gate if the
    /// backend needs it.
    async fn attempt(
        &self,
        job: &SceneJob,
        strategy: ImageStrategy,
        reference: Option<&Path>,
        cancel: &CancellationToken,
    ) -> rf_core::Result<Vec<u8>> {
        let _slot = match self.gate {
            Some(ref gate) => Some(
                cancellable(cancel, async {
                    gate.acquire()
                        .await
                        .map_err(|_| rf_core::Error::Internal("image gate closed".into()))
                })
                .await?,
            ),
            None => None,
        };

        let model = self.config.image_model.as_str();
        match (strategy, reference) {
            (ImageStrategy::WithReference { strength }, Some(reference)) => {
                let prompt = format!("{}{}", self.config.consistency_prefix, job.prompt);
                self.backend
                    .synthesize_image_with_reference(&prompt, model, reference, strength)
                    .await
            }
            _ => self.backend.synthesize_image(&job.prompt, model, None).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeImages;
    use assert_matches::assert_matches;
    use rf_core::{PartSpec, SceneSpec, StageProgress};
    use std::time::Duration;

    fn project(dir: &Path, scenes: usize) -> Project {
        let mut project = Project::new("volcanoes", "science", dir);
        let scenes = (0..scenes)
            .map(|i| SceneSpec::new(i, format!("narration {i}"), format!("prompt {i}")))
            .collect();
        project.parts = vec![PartSpec::new(1, scenes)];
        project
    }

    fn config(chaining: bool) -> GenerationConfig {
        GenerationConfig {
            chaining,
            ..GenerationConfig::default()
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
        }
    }

    async fn run(
        images: Arc<FakeImages>,
        config: GenerationConfig,
        project: &Project,
    ) -> ImageBatchResult {
        let generator = ImageGenerator::new(images, config).with_policy(fast());
        let counter = StageProgress::detached().counter(project.scene_count());
        generator.generate(project, &counter, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn bookends_copy_reference_without_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let cover = dir.path().join("cover.png");
        std::fs::write(&cover, b"\x89PNG cover bytes").unwrap();
        let project = project(dir.path(), 4).with_reference_image(Some(cover.clone()));

        let images = Arc::new(FakeImages::new());
        let result = run(images.clone(), config(false), &project).await;

        assert!(result.error.is_none());
        assert_eq!(result.completed.len(), 4);
        let prompts: Vec<String> = images.calls().into_iter().map(|c| c.prompt).collect();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts.contains(&"prompt 0".to_string()));
        assert!(!prompts.contains(&"prompt 3".to_string()));

        let cover_bytes = std::fs::read(&cover).unwrap();
        assert_eq!(std::fs::read(project.image_path_for(0)).unwrap(), cover_bytes);
        assert_eq!(std::fs::read(project.image_path_for(3)).unwrap(), cover_bytes);
    }

    #[tokio::test]
    async fn chained_conditions_on_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path(), 3);
        let images = Arc::new(FakeImages::new());
        let result = run(images.clone(), config(true), &project).await;

        assert!(result.error.is_none());
        let calls = images.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].reference, None);
        assert_eq!(calls[1].reference, Some(project.image_path_for(0)));
        assert!(calls[1].prompt.starts_with("Keep the same characters"));
        assert!(calls[1].prompt.ends_with("prompt 1"));
        assert_eq!(calls[2].reference, Some(project.image_path_for(1)));
    }

    #[tokio::test]
    async fn reference_failure_degrades_to_prompt_only() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path(), 2);
        let images = Arc::new(FakeImages::new().failing_with_reference());
        let result = run(images.clone(), config(true), &project).await;

        assert!(result.error.is_none());
        assert_eq!(result.completed.len(), 2);
        let calls = images.calls();
        // scene 0 prompt-only, scene 1 three reference attempts then prompt-only
        assert_eq!(calls.len(), 5);
        assert!(calls[1..4].iter().all(|c| c.reference.is_some()));
        assert_eq!(calls[4].reference, None);
        assert_eq!(calls[4].prompt, "prompt 1");
    }

    #[tokio::test]
    async fn transient_reference_failure_is_retried_before_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path(), 3);
        let images = Arc::new(FakeImages::new().failing_first_reference_calls(1));
        let result = run(images.clone(), config(true), &project).await;

        assert!(result.error.is_none());
        assert_eq!(result.completed.len(), 3);
        let calls = images.calls();
        // scene 0 prompt-only, scene 1 fails once then succeeds, scene 2 once
        assert_eq!(calls.len(), 4);
        assert!(calls[1..].iter().all(|c| c.reference.is_some()));
        assert_eq!(calls[2].reference, Some(project.image_path_for(0)));
        assert_eq!(calls[3].reference, Some(project.image_path_for(1)));
    }

    #[tokio::test]
    async fn consecutive_failures_abort_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path(), 6);
        let images = Arc::new(FakeImages::new().failing());
        let result = run(images.clone(), config(true), &project).await;

        assert_matches!(result.error, Some(rf_core::Error::Backend { .. }));
        assert!(result.completed.is_empty());
        // three scenes, three attempts each, then abort
        assert_eq!(images.call_count(), 9);
        assert!(!project.image_path_for(0).exists());
    }

    #[tokio::test]
    async fn isolated_failures_are_left_for_verification() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path(), 5);
        let images = Arc::new(FakeImages::new().failing_on("prompt 2"));
        let result = run(images.clone(), config(false), &project).await;

        assert!(result.error.is_none());
        let done: Vec<usize> = result.completed.iter().map(|(i, _)| *i).collect();
        assert_eq!(done, vec![0, 1, 3, 4]);
    }

    #[tokio::test]
    async fn existing_images_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path(), 3);
        for i in 0..3 {
            let path = project.image_path_for(i);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"png").unwrap();
        }
        let images = Arc::new(FakeImages::new());
        let result = run(images.clone(), config(true), &project).await;
        assert_eq!(result.completed.len(), 3);
        assert_eq!(images.call_count(), 0);
    }

    #[tokio::test]
    async fn single_slot_backend_is_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path(), 4);
        let images = Arc::new(
            FakeImages::new()
                .single_slot()
                .with_delay(Duration::from_millis(10)),
        );
        let result = run(images.clone(), config(false), &project).await;
        assert!(result.error.is_none());
        assert_eq!(images.call_count(), 4);
        assert_eq!(images.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn independent_pool_runs_in_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path(), 6);
        let images = Arc::new(FakeImages::new().with_delay(Duration::from_millis(30)));
        let result = run(images.clone(), config(false), &project).await;
        assert!(result.error.is_none());
        assert!(images.max_in_flight() > 1);
        assert!(images.max_in_flight() <= 3);
    }

    #[tokio::test]
    async fn cancellation_stops_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path(), 3);
        let images = Arc::new(FakeImages::new().with_delay(Duration::from_secs(30)));
        let generator = ImageGenerator::new(images, config(true)).with_policy(fast());
        let counter = StageProgress::detached().counter(3);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            generator.generate(&project, &counter, &cancel),
        )
        .await
        .unwrap();
        assert_matches!(result.error, Some(rf_core::Error::Cancelled));
        assert!(!project.image_path_for(0).exists());
    }
}
