//! Assembly: timed images + narration parts (+ music) into one video.
//!
//! Stages run strictly in order, each owning a slice of the caller's progress
//! range:
//!
//! | stage          | range   |
//! |----------------|---------|
//! | clip synthesis | 0-50 %  |
//! | audio merge    | 50-55 % |
//! | music mix      | 55-65 % |
//! | composite      | 65-99 % |
//! | done           | 100 %   |
//!
//! All intermediates live in one [`Workspace`] that is removed when
//! [`Assembler::assemble`] returns, whatever the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rf_core::config::RenderConfig;
use rf_core::{RenderRequest, StageProgress};
use tokio_util::sync::CancellationToken;

use crate::audio::{merge_narration, mix_bgm};
use crate::clip::ClipSynthesizer;
use crate::encoder::video_encode_args;
use crate::transcoder::Transcode;
use crate::transition::{build_graph, OUTPUT_LABEL};
use crate::workspace::Workspace;

/// Sequential stages of one assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStage {
    ClipSynthesis,
    AudioMerge,
    BgmMix,
    Composite,
}

impl AssemblyStage {
    /// Share of the caller's range, as `(from, to)` ratios.
    pub fn range(self) -> (f64, f64) {
        match self {
            AssemblyStage::ClipSynthesis => (0.0, 0.50),
            AssemblyStage::AudioMerge => (0.50, 0.55),
            AssemblyStage::BgmMix => (0.55, 0.65),
            AssemblyStage::Composite => (0.65, 0.99),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AssemblyStage::ClipSynthesis => "clip synthesis",
            AssemblyStage::AudioMerge => "audio merge",
            AssemblyStage::BgmMix => "music mix",
            AssemblyStage::Composite => "composite",
        }
    }

    fn progress(self, parent: &StageProgress) -> StageProgress {
        let (from, to) = self.range();
        parent.sub(from, to, self.name())
    }
}

/// Arguments for the final compositing invocation.
///
/// With a graph script the clips are cross-faded through it; without one the
/// single clip is paired with the audio directly.
pub fn composite_args(
    clips: &[PathBuf],
    audio: &Path,
    graph_script: Option<&Path>,
    encode_args: &[String],
    audio_bitrate: &str,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into()];
    for clip in clips {
        args.push("-i".into());
        args.push(clip.to_string_lossy().into_owned());
    }
    args.push("-i".into());
    args.push(audio.to_string_lossy().into_owned());

    match graph_script {
        Some(script) => {
            args.push("-filter_complex_script".into());
            args.push(script.to_string_lossy().into_owned());
            args.push("-map".into());
            args.push(format!("[{OUTPUT_LABEL}]"));
        }
        None => {
            args.push("-map".into());
            args.push("0:v".into());
        }
    }
    args.push("-map".into());
    args.push(format!("{}:a", clips.len()));

    args.extend(encode_args.iter().cloned());
    args.extend(
        ["-c:a", "aac", "-b:a", audio_bitrate, "-movflags", "+faststart", "-shortest"].map(String::from),
    );
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Runs the assembly stages through a [`Transcode`].
pub struct Assembler {
    transcoder: Arc<dyn Transcode>,
    render: RenderConfig,
}

impl Assembler {
    pub fn new(transcoder: Arc<dyn Transcode>, render: RenderConfig) -> Self {
        Self { transcoder, render }
    }

    /// Produce `request.output_path`, reporting into `progress`.
    ///
    /// # Errors
    ///
    /// Validation errors before any work starts; otherwise the first stage
    /// failure, or [`rf_core::Error::Cancelled`]. The output path is only
    /// written on success.
    pub async fn assemble(
        &self,
        request: &RenderRequest,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> rf_core::Result<PathBuf> {
        request.validate()?;

        tracing::info!(
            "Assembling {} scenes, {} narration parts -> {} (hardware={}, bgm={})",
            request.ordered_scene_images.len(),
            request.ordered_audio_parts.len(),
            request.output_path.display(),
            request.use_hardware_encode,
            request.bgm.is_some(),
        );

        let workspace = Workspace::new()?;
        let transcoder = self.transcoder.as_ref();

        // Clips.
        let stage = AssemblyStage::ClipSynthesis.progress(progress);
        let synthesizer = ClipSynthesizer::new(
            self.transcoder.clone(),
            self.render.clone(),
            request.use_hardware_encode,
        );
        let clips = synthesizer
            .synthesize_all(&request.ordered_scene_images, &workspace, &stage, cancel)
            .await?;
        stage.complete();

        // Narration.
        ensure_live(cancel)?;
        let stage = AssemblyStage::AudioMerge.progress(progress);
        let narration = merge_narration(transcoder, &request.ordered_audio_parts, &workspace, cancel).await?;
        stage.complete();

        // Music.
        ensure_live(cancel)?;
        let stage = AssemblyStage::BgmMix.progress(progress);
        let audio = match request.bgm {
            Some(ref bgm) => {
                mix_bgm(
                    transcoder,
                    &narration,
                    bgm,
                    &self.render.ducking,
                    &workspace,
                    &stage,
                    cancel,
                )
                .await?
            }
            None => narration,
        };
        stage.complete();

        // Composite.
        ensure_live(cancel)?;
        let stage = AssemblyStage::Composite.progress(progress);
        let durations: Vec<f64> = request
            .ordered_scene_images
            .iter()
            .map(|s| s.duration_secs)
            .collect();

        let script = if clips.len() > 1 {
            let graph = build_graph(&clips, &durations, self.render.transition_secs)?
                .ok_or_else(|| rf_core::Error::Internal("no transition graph for multiple clips".into()))?;
            let path = workspace.temp_file("transitions.txt");
            graph.write_script(&path).await?;
            tracing::debug!("transition graph: {} stages", graph.stage_count());
            Some(path)
        } else {
            None
        };

        let ext = request
            .output_path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".into());
        let produced = workspace.temp_file(&format!("final.{ext}"));
        let args = composite_args(
            &clips,
            &audio,
            script.as_deref(),
            &video_encode_args(&self.render, request.use_hardware_encode),
            &self.render.audio_bitrate,
            &produced,
        );
        transcoder
            .run_with_progress(args, request.total_duration_secs(), &stage, cancel)
            .await?;
        stage.complete();

        let output = workspace.finalize(&produced, &request.output_path)?;
        progress.complete();
        tracing::info!("Assembly complete: {}", output.display());
        Ok(output)
    }
}

fn ensure_live(cancel: &CancellationToken) -> rf_core::Result<()> {
    if cancel.is_cancelled() {
        Err(rf_core::Error::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTranscoder;
    use assert_matches::assert_matches;
    use rf_core::{allocate_scene_durations, BgmSpec, ProgressAggregator, SceneImage};
    use std::fs;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn file(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, b"data").unwrap();
            path
        }

        fn request(&self, durations: &[f64], parts: usize) -> RenderRequest {
            RenderRequest {
                ordered_scene_images: durations
                    .iter()
                    .enumerate()
                    .map(|(i, &d)| SceneImage {
                        path: self.file(&format!("scene_{i:03}.png")),
                        duration_secs: d,
                    })
                    .collect(),
                ordered_audio_parts: (1..=parts).map(|n| self.file(&format!("part_{n}.wav"))).collect(),
                output_path: self.dir.path().join("out").join("video.mp4"),
                use_hardware_encode: false,
                bgm: None,
            }
        }
    }

    async fn run(fake: &Arc<FakeTranscoder>, request: &RenderRequest) -> (rf_core::Result<PathBuf>, u8) {
        let assembler = Assembler::new(fake.clone(), RenderConfig::default());
        let agg = ProgressAggregator::new();
        let progress = agg.stage(0.0, 100.0, "assembly");
        let result = assembler
            .assemble(request, &progress, &CancellationToken::new())
            .await;
        (result, agg.value())
    }

    #[tokio::test]
    async fn single_clip_skips_transition_graph() {
        let fx = Fixture::new();
        let request = fx.request(&[5.0], 1);
        let fake = Arc::new(FakeTranscoder::new().with_default_duration(5.0));

        let (result, pct) = run(&fake, &request).await;
        let output = result.unwrap();
        assert_eq!(output, request.output_path);
        assert!(output.exists());
        assert_eq!(pct, 100);

        assert!(fake.invocations_with("-filter_complex_script").is_empty());
        assert!(fake.filter_scripts().is_empty());
        let invocations = fake.invocations();
        // one clip + composite; a single part needs no merge
        assert_eq!(invocations.len(), 2);
        let composite = invocations.last().unwrap();
        let joined = composite.join(" ");
        assert!(joined.contains("-map 0:v -map 1:a"), "{joined}");
        let t = invocations[0].iter().position(|a| a == "-t").unwrap();
        assert_eq!(invocations[0][t + 1], "5.00");
    }

    #[tokio::test]
    async fn five_scenes_cross_fade_at_cumulative_offsets() {
        let fx = Fixture::new();
        let durations = allocate_scene_durations(40.0, &[10; 5]);
        assert_eq!(durations, vec![8.0; 5]);
        let request = fx.request(&durations, 3);
        let fake = Arc::new(FakeTranscoder::new().with_default_duration(40.0));

        let (result, _) = run(&fake, &request).await;
        result.unwrap();

        let clip_lengths: Vec<String> = fake
            .invocations_with("-loop")
            .iter()
            .map(|args| {
                let t = args.iter().position(|a| a == "-t").unwrap();
                args[t + 1].clone()
            })
            .collect();
        let mut sorted = clip_lengths.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["8.00", "9.00", "9.00", "9.00", "9.00"]);

        assert_eq!(fake.invocations_with("concat").len(), 1);

        let scripts = fake.filter_scripts();
        assert_eq!(scripts.len(), 1);
        let offsets: Vec<&str> = scripts[0]
            .split("offset=")
            .skip(1)
            .map(|s| s.split('[').next().unwrap())
            .collect();
        assert_eq!(offsets, vec!["8.00", "16.00", "24.00", "32.00"]);
        assert!(scripts[0].ends_with("[vout]"));

        let composite = fake.invocations_with("-filter_complex_script");
        assert!(composite[0].join(" ").contains("-map [vout] -map 5:a"));
    }

    #[tokio::test]
    async fn music_fade_out_ends_with_narration() {
        let fx = Fixture::new();
        let mut request = fx.request(&[6.0, 6.0], 1);
        request.bgm = Some(BgmSpec {
            file_path: fx.file("bed.mp3"),
            volume: 0.3,
            fade_in_secs: 1.0,
            fade_out_secs: 5.0,
        });
        let fake = Arc::new(FakeTranscoder::new().with_default_duration(12.0));

        let (result, pct) = run(&fake, &request).await;
        result.unwrap();
        assert_eq!(pct, 100);

        let mix = fake.invocations_with("sidechaincompress");
        assert_eq!(mix.len(), 1);
        assert!(mix[0].join(" ").contains("afade=t=out:st=7.00:d=5.00"));
        assert_eq!(fake.probes(), vec![request.ordered_audio_parts[0].clone()]);
    }

    #[tokio::test]
    async fn unknown_narration_length_skips_music() {
        let fx = Fixture::new();
        let mut request = fx.request(&[4.0], 1);
        request.bgm = Some(BgmSpec {
            file_path: fx.file("bed.mp3"),
            volume: 0.3,
            fade_in_secs: 0.0,
            fade_out_secs: 2.0,
        });
        let fake = Arc::new(FakeTranscoder::new());

        let (result, _) = run(&fake, &request).await;
        result.unwrap();
        assert!(fake.invocations_with("sidechaincompress").is_empty());
    }

    #[tokio::test]
    async fn clip_failure_aborts_and_leaves_no_output() {
        let fx = Fixture::new();
        let request = fx.request(&[3.0, 3.0, 3.0, 3.0], 2);
        let fake = Arc::new(FakeTranscoder::new().failing_on("scene_002.png"));

        let (result, pct) = run(&fake, &request).await;
        assert_matches!(result, Err(rf_core::Error::TranscodeFailure { .. }));
        assert!(!request.output_path.exists());
        assert!(pct < 50);
        assert!(fake.invocations_with("concat").is_empty());
    }

    #[tokio::test]
    async fn cancellation_is_reported_distinctly() {
        let fx = Fixture::new();
        let request = fx.request(&[3.0, 3.0], 1);
        let fake = Arc::new(FakeTranscoder::new());
        let assembler = Assembler::new(fake.clone(), RenderConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = assembler
            .assemble(&request, &StageProgress::detached(), &cancel)
            .await;
        assert_matches!(result, Err(rf_core::Error::Cancelled));
        assert!(!request.output_path.exists());
    }

    #[tokio::test]
    async fn invalid_request_runs_nothing() {
        let fx = Fixture::new();
        let mut request = fx.request(&[3.0], 1);
        request.ordered_scene_images[0].path = fx.dir.path().join("missing.png");
        let fake = Arc::new(FakeTranscoder::new());

        let (result, _) = run(&fake, &request).await;
        assert_matches!(result, Err(rf_core::Error::Validation(_)));
        assert!(fake.invocations().is_empty());
    }

    #[test]
    fn stage_ranges_are_contiguous() {
        let stages = [
            AssemblyStage::ClipSynthesis,
            AssemblyStage::AudioMerge,
            AssemblyStage::BgmMix,
            AssemblyStage::Composite,
        ];
        let mut end = 0.0;
        for stage in stages {
            let (from, to) = stage.range();
            assert_eq!(from, end);
            assert!(to > from);
            end = to;
        }
        assert_eq!(end, 0.99);
    }
}
