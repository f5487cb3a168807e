//! Project data model: scenes, parts, render requests and pipeline outcomes.
//!
//! [`Project`] is the in-memory aggregate the orchestrator mutates. Its
//! artifact paths are deterministic so that a re-run finds the outputs of a
//! previous run and skips them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{ErrorKind, Result};
use crate::timing::allocate_scene_durations;
use crate::Error;

const SNAPSHOT_FILE: &str = "project.json";

/// Whether `path` holds a usable generated artifact (exists and non-empty).
pub fn artifact_ready(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Scenes and parts
// ---------------------------------------------------------------------------

/// One narrated beat with its own image and display duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSpec {
    /// Position in the whole sequence (0-based, across all parts).
    pub index: usize,
    pub narration_text: String,
    pub image_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    /// Derived from the part's narration length; never authored directly.
    #[serde(default)]
    pub duration_secs: f64,
}

impl SceneSpec {
    pub fn new(index: usize, narration_text: impl Into<String>, image_prompt: impl Into<String>) -> Self {
        Self {
            index,
            narration_text: narration_text.into(),
            image_prompt: image_prompt.into(),
            image_path: None,
            duration_secs: 0.0,
        }
    }

    /// Whether the scene has a resolved image that exists on disk.
    pub fn has_image(&self) -> bool {
        self.image_path.as_deref().is_some_and(artifact_ready)
    }
}

/// One narration segment with its audio track and ordered scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartSpec {
    /// 1-based part number.
    pub part_number: u32,
    pub scenes: Vec<SceneSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    #[serde(default)]
    pub audio_duration_secs: f64,
}

impl PartSpec {
    pub fn new(part_number: u32, scenes: Vec<SceneSpec>) -> Self {
        Self {
            part_number,
            scenes,
            audio_path: None,
            audio_duration_secs: 0.0,
        }
    }

    /// Whether the part has a resolved narration file that exists on disk.
    pub fn has_audio(&self) -> bool {
        self.audio_path.as_deref().is_some_and(artifact_ready)
    }

    /// The narration for this part, scenes joined in order.
    pub fn narration(&self) -> String {
        self.scenes
            .iter()
            .map(|s| s.narration_text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Record the narration file and re-derive every scene duration from it.
    pub fn set_audio(&mut self, path: PathBuf, duration_secs: f64) {
        self.audio_path = Some(path);
        self.audio_duration_secs = duration_secs;
        self.reallocate_durations();
    }

    /// Recompute scene durations from the narration duration and text lengths.
    pub fn reallocate_durations(&mut self) {
        if self.audio_duration_secs <= 0.0 || self.scenes.is_empty() {
            return;
        }
        let lengths: Vec<usize> = self
            .scenes
            .iter()
            .map(|s| s.narration_text.chars().count())
            .collect();
        let durations = allocate_scene_durations(self.audio_duration_secs, &lengths);
        for (scene, d) in self.scenes.iter_mut().zip(durations) {
            scene.duration_secs = d;
        }
    }
}

// ---------------------------------------------------------------------------
// Project aggregate
// ---------------------------------------------------------------------------

/// The in-memory project: topic, artifact directory and all parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub topic: String,
    pub category: String,
    pub work_dir: PathBuf,
    /// Cover image reused as first and last scene image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<PathBuf>,
    #[serde(default)]
    pub parts: Vec<PartSpec>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(topic: impl Into<String>, category: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            topic: topic.into(),
            category: category.into(),
            work_dir: work_dir.into(),
            reference_image: None,
            parts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Builder: set the bookend cover image.
    pub fn with_reference_image(mut self, path: Option<PathBuf>) -> Self {
        self.reference_image = path;
        self
    }

    /// Deterministic image path for the scene at `index`.
    pub fn image_path_for(&self, index: usize) -> PathBuf {
        self.work_dir.join("images").join(format!("scene_{index:03}.png"))
    }

    /// Deterministic narration path for part `part_number`.
    pub fn audio_path_for(&self, part_number: u32) -> PathBuf {
        self.work_dir.join("audio").join(format!("part_{part_number}.wav"))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.work_dir.join(SNAPSHOT_FILE)
    }

    pub fn scenes(&self) -> impl Iterator<Item = &SceneSpec> {
        self.parts.iter().flat_map(|p| p.scenes.iter())
    }

    pub fn scenes_mut(&mut self) -> impl Iterator<Item = &mut SceneSpec> {
        self.parts.iter_mut().flat_map(|p| p.scenes.iter_mut())
    }

    pub fn scene_count(&self) -> usize {
        self.parts.iter().map(|p| p.scenes.len()).sum()
    }

    pub fn scene_mut(&mut self, index: usize) -> Option<&mut SceneSpec> {
        self.scenes_mut().find(|s| s.index == index)
    }

    pub fn scenes_with_images(&self) -> usize {
        self.scenes().filter(|s| s.has_image()).count()
    }

    pub fn parts_with_audio(&self) -> usize {
        self.parts.iter().filter(|p| p.has_audio()).count()
    }

    /// Clear a scene's image so the next run regenerates it.
    pub fn reset_scene_image(&mut self, index: usize) -> Result<()> {
        let path = self.image_path_for(index);
        let scene = self
            .scene_mut(index)
            .ok_or_else(|| Error::Validation(format!("no scene with index {index}")))?;
        scene.image_path = None;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Build the immutable assembly input from the current project state.
    pub fn render_request(
        &self,
        output_path: PathBuf,
        use_hardware_encode: bool,
        bgm: Option<BgmSpec>,
    ) -> Result<RenderRequest> {
        let mut images = Vec::with_capacity(self.scene_count());
        for scene in self.scenes() {
            let path = scene.image_path.clone().ok_or_else(|| {
                Error::Validation(format!("scene {} has no image", scene.index))
            })?;
            images.push(SceneImage {
                path,
                duration_secs: scene.duration_secs,
            });
        }
        let mut audio = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            let path = part.audio_path.clone().ok_or_else(|| {
                Error::Validation(format!("part {} has no audio", part.part_number))
            })?;
            audio.push(path);
        }
        Ok(RenderRequest {
            ordered_scene_images: images,
            ordered_audio_parts: audio,
            output_path,
            use_hardware_encode,
            bgm,
        })
    }

    /// Write the project snapshot atomically (temp file + rename).
    pub fn save_snapshot(&self) -> Result<()> {
        std::fs::create_dir_all(&self.work_dir)?;
        let path = self.snapshot_path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Internal(format!("snapshot serialization: {e}")))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load a snapshot from `work_dir`, or `None` if there is none.
    pub fn load_snapshot(work_dir: &Path) -> Result<Option<Self>> {
        let path = work_dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let project: Project = serde_json::from_str(&content)
            .map_err(|e| Error::Validation(format!("snapshot {}: {e}", path.display())))?;
        Ok(Some(project))
    }
}

// ---------------------------------------------------------------------------
// Render request
// ---------------------------------------------------------------------------

/// One timed still image in a render request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneImage {
    pub path: PathBuf,
    pub duration_secs: f64,
}

/// Background music settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgmSpec {
    pub file_path: PathBuf,
    /// Linear gain in `[0, 1]`.
    pub volume: f64,
    #[serde(default)]
    pub fade_in_secs: f64,
    #[serde(default)]
    pub fade_out_secs: f64,
}

/// Immutable input to the assembly coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub ordered_scene_images: Vec<SceneImage>,
    pub ordered_audio_parts: Vec<PathBuf>,
    pub output_path: PathBuf,
    #[serde(default)]
    pub use_hardware_encode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgm: Option<BgmSpec>,
}

impl RenderRequest {
    /// Reject unusable requests before any subprocess is started.
    pub fn validate(&self) -> Result<()> {
        if self.ordered_scene_images.is_empty() {
            return Err(Error::Validation("render request has no scene images".into()));
        }
        if self.ordered_audio_parts.is_empty() {
            return Err(Error::Validation("render request has no audio parts".into()));
        }
        for (i, img) in self.ordered_scene_images.iter().enumerate() {
            if !img.path.exists() {
                return Err(Error::Validation(format!(
                    "scene image {i} does not exist: {}",
                    img.path.display()
                )));
            }
            if img.duration_secs.is_nan() || img.duration_secs <= 0.0 {
                return Err(Error::Validation(format!(
                    "scene image {i} has non-positive duration {}",
                    img.duration_secs
                )));
            }
        }
        for audio in &self.ordered_audio_parts {
            if !audio.exists() {
                return Err(Error::Validation(format!(
                    "audio part does not exist: {}",
                    audio.display()
                )));
            }
        }
        if let Some(ref bgm) = self.bgm {
            if !bgm.file_path.exists() {
                return Err(Error::Validation(format!(
                    "bgm file does not exist: {}",
                    bgm.file_path.display()
                )));
            }
            if !(0.0..=1.0).contains(&bgm.volume) {
                return Err(Error::Validation(format!("bgm volume {} outside [0, 1]", bgm.volume)));
            }
            if bgm.fade_in_secs < 0.0 || bgm.fade_out_secs < 0.0 {
                return Err(Error::Validation("bgm fades must be non-negative".into()));
            }
        }
        Ok(())
    }

    /// Logical duration of the finished video.
    pub fn total_duration_secs(&self) -> f64 {
        self.ordered_scene_images.iter().map(|s| s.duration_secs).sum()
    }
}

// ---------------------------------------------------------------------------
// Pipeline state and outcome
// ---------------------------------------------------------------------------

/// Top-level pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    ScriptGeneration,
    MediaGeneration,
    ImageGeneration,
    AudioGeneration,
    Verification,
    Assembly,
    Done,
    Aborted,
}

impl PipelineStage {
    pub fn name(self) -> &'static str {
        match self {
            PipelineStage::ScriptGeneration => "script generation",
            PipelineStage::MediaGeneration => "image + audio generation",
            PipelineStage::ImageGeneration => "image generation",
            PipelineStage::AudioGeneration => "audio generation",
            PipelineStage::Verification => "verification",
            PipelineStage::Assembly => "assembly",
            PipelineStage::Done => "done",
            PipelineStage::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A completed stage and how long it took.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub stage: PipelineStage,
    pub duration: Duration,
}

/// Stage timing for progress display and telemetry. Never drives control flow.
#[derive(Debug, Clone)]
pub struct PipelineState {
    started: Instant,
    current: Option<(PipelineStage, Instant)>,
    completed: Vec<StageRecord>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            current: None,
            completed: Vec::new(),
        }
    }

    /// Enter `stage`, closing the previous one.
    pub fn begin(&mut self, stage: PipelineStage) {
        self.finish();
        self.current = Some((stage, Instant::now()));
    }

    /// Close the active stage, if any.
    pub fn finish(&mut self) {
        if let Some((stage, since)) = self.current.take() {
            self.completed.push(StageRecord {
                stage,
                duration: since.elapsed(),
            });
        }
    }

    pub fn current(&self) -> Option<PipelineStage> {
        self.current.map(|(s, _)| s)
    }

    pub fn stage_elapsed(&self) -> Duration {
        self.current.map(|(_, t)| t.elapsed()).unwrap_or_default()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn completed(&self) -> &[StageRecord] {
        &self.completed
    }

    /// Periodic elapsed-time ticks for an external observer.
    ///
    /// The ticking task ends when every receiver has been dropped.
    pub fn ticker(&self, period: Duration) -> watch::Receiver<Duration> {
        let started = self.started;
        let (tx, rx) = watch::channel(started.elapsed());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if tx.send(started.elapsed()).is_err() {
                    break;
                }
            }
        });
        rx
    }
}

/// Structured result of a top-level pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub succeeded: bool,
    pub scenes_completed: usize,
    pub scenes_total: usize,
    pub parts_completed: usize,
    pub parts_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl GenerationOutcome {
    /// Count what the project holds right now.
    pub fn tally(project: &Project) -> Self {
        Self {
            succeeded: false,
            scenes_completed: project.scenes_with_images(),
            scenes_total: project.scene_count(),
            parts_completed: project.parts_with_audio(),
            parts_total: project.parts.len(),
            failure_reason: None,
            failure_kind: None,
            output_path: None,
        }
    }

    pub fn success(project: &Project, output_path: PathBuf) -> Self {
        Self {
            succeeded: true,
            output_path: Some(output_path),
            ..Self::tally(project)
        }
    }

    pub fn failure(project: &Project, err: &Error) -> Self {
        Self {
            failure_reason: Some(err.to_string()),
            failure_kind: Some(err.kind()),
            ..Self::tally(project)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.failure_kind == Some(ErrorKind::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_project(dir: &Path) -> Project {
        let mut project = Project::new("volcanoes", "science", dir);
        project.parts = vec![
            PartSpec::new(
                1,
                vec![
                    SceneSpec::new(0, "aaaa", "p0"),
                    SceneSpec::new(1, "aaaa", "p1"),
                ],
            ),
            PartSpec::new(2, vec![SceneSpec::new(2, "aaaa", "p2")]),
        ];
        project
    }

    #[test]
    fn deterministic_artifact_paths() {
        let project = Project::new("t", "c", "/work");
        assert_eq!(
            project.image_path_for(7),
            PathBuf::from("/work/images/scene_007.png")
        );
        assert_eq!(project.audio_path_for(2), PathBuf::from("/work/audio/part_2.wav"));
    }

    #[test]
    fn set_audio_reallocates_scene_durations() {
        let mut part = PartSpec::new(
            1,
            vec![SceneSpec::new(0, "aaaaaaaaaa", "a"), SceneSpec::new(1, "aaaaaaaaaa", "b")],
        );
        part.set_audio(PathBuf::from("/tmp/p.wav"), 20.0);
        assert_eq!(part.scenes[0].duration_secs, 10.0);
        assert_eq!(part.scenes[1].duration_secs, 10.0);
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = sample_project(dir.path());
        project.parts[0].audio_duration_secs = 8.0;
        project.save_snapshot().unwrap();
        assert!(!dir.path().join("project.json.tmp").exists());

        let loaded = Project::load_snapshot(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, project);
    }

    #[test]
    fn load_snapshot_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Project::load_snapshot(dir.path()).unwrap().is_none());
    }

    #[test]
    fn counts_only_existing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = sample_project(dir.path());
        let img = dir.path().join("a.png");
        fs::write(&img, b"png").unwrap();
        project.parts[0].scenes[0].image_path = Some(img);
        project.parts[0].scenes[1].image_path = Some(dir.path().join("missing.png"));
        assert_eq!(project.scenes_with_images(), 1);

        let outcome = GenerationOutcome::tally(&project);
        assert_eq!(outcome.scenes_completed, 1);
        assert_eq!(outcome.scenes_total, 3);
        assert_eq!(outcome.parts_total, 2);
        assert_eq!(outcome.parts_completed, 0);
    }

    #[test]
    fn reset_scene_image_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = sample_project(dir.path());
        let path = project.image_path_for(1);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"png").unwrap();
        project.parts[0].scenes[1].image_path = Some(path.clone());

        project.reset_scene_image(1).unwrap();
        assert!(!path.exists());
        assert!(project.parts[0].scenes[1].image_path.is_none());
        assert!(project.reset_scene_image(99).is_err());
    }

    #[test]
    fn render_request_validation() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("a.png");
        let wav = dir.path().join("a.wav");
        fs::write(&img, b"png").unwrap();
        fs::write(&wav, b"wav").unwrap();

        let mut req = RenderRequest {
            ordered_scene_images: vec![SceneImage {
                path: img,
                duration_secs: 5.0,
            }],
            ordered_audio_parts: vec![wav],
            output_path: dir.path().join("out.mp4"),
            use_hardware_encode: false,
            bgm: None,
        };
        assert!(req.validate().is_ok());

        req.ordered_scene_images[0].duration_secs = 0.0;
        assert!(req.validate().is_err());
        req.ordered_scene_images[0].duration_secs = 5.0;

        req.bgm = Some(BgmSpec {
            file_path: dir.path().join("missing.mp3"),
            volume: 0.3,
            fade_in_secs: 1.0,
            fade_out_secs: 1.0,
        });
        assert!(req.validate().is_err());

        req.bgm = None;
        req.ordered_scene_images.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn pipeline_state_records_stages() {
        let mut state = PipelineState::new();
        state.begin(PipelineStage::ScriptGeneration);
        assert_eq!(state.current(), Some(PipelineStage::ScriptGeneration));
        state.begin(PipelineStage::MediaGeneration);
        state.finish();
        assert_eq!(state.current(), None);
        let stages: Vec<_> = state.completed().iter().map(|r| r.stage).collect();
        assert_eq!(
            stages,
            vec![PipelineStage::ScriptGeneration, PipelineStage::MediaGeneration]
        );
    }

    #[tokio::test]
    async fn ticker_reports_elapsed() {
        let state = PipelineState::new();
        let mut rx = state.ticker(Duration::from_millis(10));
        rx.changed().await.unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow() > Duration::ZERO);
    }

    #[test]
    fn outcome_from_cancellation() {
        let project = Project::new("t", "c", "/w");
        let outcome = GenerationOutcome::failure(&project, &Error::Cancelled);
        assert!(!outcome.succeeded);
        assert!(outcome.is_cancelled());
    }
}
