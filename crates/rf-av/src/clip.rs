//! Clip synthesis: one timed still image becomes one motion clip.
//!
//! Each clip is rendered by a single transcoder invocation. Images are
//! upscaled to the working resolution, pan/zoomed there, then downsampled to
//! the output frame. All clips but the last are rendered one transition
//! longer than their logical duration so the cross-fade has material to
//! consume.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use rf_core::config::RenderConfig;
use rf_core::{SceneImage, StageProgress};
use tokio_util::sync::CancellationToken;

use crate::encoder::video_encode_args;
use crate::transcoder::Transcode;
use crate::workspace::Workspace;

/// Camera motion applied to a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Static,
    /// From `zoom_max` down to 1.0.
    ZoomOut,
    /// From 1.0 up to `zoom_max`.
    ZoomIn,
}

impl Motion {
    /// Motion for the clip at `index`: the first clip is static, odd clips
    /// zoom out, even clips zoom in.
    pub fn for_index(index: usize) -> Self {
        match index {
            0 => Motion::Static,
            i if i % 2 == 1 => Motion::ZoomOut,
            _ => Motion::ZoomIn,
        }
    }

    /// Per-frame zoom expression, linear across `frames`.
    fn zoom_expr(self, frames: u64, zoom_max: f64) -> Option<String> {
        let span = frames.saturating_sub(1).max(1);
        let delta = zoom_max - 1.0;
        match self {
            Motion::Static => None,
            Motion::ZoomIn => Some(format!("1+{delta:.4}*min(on/{span},1)")),
            Motion::ZoomOut => Some(format!("{zoom_max:.4}-{delta:.4}*min(on/{span},1)")),
        }
    }
}

/// Everything needed to render one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPlan {
    pub index: usize,
    pub image: PathBuf,
    /// Time the scene is on screen in the finished video.
    pub logical_secs: f64,
    /// Rendered length, including cross-fade overlap.
    pub encode_secs: f64,
    pub frames: u64,
    pub motion: Motion,
}

impl ClipPlan {
    pub fn new(index: usize, image: PathBuf, logical_secs: f64, is_last: bool, transition_secs: f64, fps: u32) -> Self {
        let encode_secs = if is_last {
            logical_secs
        } else {
            logical_secs + transition_secs
        };
        Self {
            index,
            image,
            logical_secs,
            encode_secs,
            frames: (encode_secs * fps as f64).round() as u64,
            motion: Motion::for_index(index),
        }
    }

    /// File name of the rendered clip.
    pub fn file_name(&self) -> String {
        format!("clip_{:03}.mp4", self.index)
    }
}

/// Plan one clip per scene image, in order.
pub fn plan_clips(images: &[SceneImage], transition_secs: f64, fps: u32) -> Vec<ClipPlan> {
    let last = images.len().saturating_sub(1);
    images
        .iter()
        .enumerate()
        .map(|(i, img)| ClipPlan::new(i, img.path.clone(), img.duration_secs, i == last, transition_secs, fps))
        .collect()
}

/// The video filter chain for one clip.
pub fn clip_filter(plan: &ClipPlan, render: &RenderConfig) -> String {
    let (ww, wh) = (render.working_width, render.working_height);
    let upscale = format!("scale={ww}:{wh}:force_original_aspect_ratio=increase,crop={ww}:{wh}");
    let finish = format!(
        "scale={}:{},setsar=1,format=yuv420p",
        render.output_width, render.output_height
    );

    match plan.motion.zoom_expr(plan.frames, render.zoom_max) {
        None => format!("{upscale},{finish}"),
        Some(z) => format!(
            "{upscale},zoompan=z='{z}':x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':d=1:s={ww}x{wh}:fps={fps},{finish}",
            fps = render.fps
        ),
    }
}

/// Transcoder arguments rendering `plan` to `output`.
pub fn clip_args(plan: &ClipPlan, output: &Path, render: &RenderConfig, encode_args: &[String]) -> Vec<String> {
    let fps = render.fps.to_string();
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-loop".into(),
        "1".into(),
        "-framerate".into(),
        fps.clone(),
        "-i".into(),
        plan.image.to_string_lossy().into_owned(),
        "-vf".into(),
        clip_filter(plan, render),
        "-t".into(),
        crate::transition::fmt_secs(plan.encode_secs),
        "-frames:v".into(),
        plan.frames.to_string(),
        "-r".into(),
        fps,
    ];
    args.extend(encode_args.iter().cloned());
    args.push("-an".into());
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Renders clips through a [`Transcode`] under a bounded pool.
pub struct ClipSynthesizer {
    transcoder: Arc<dyn Transcode>,
    render: RenderConfig,
    encode_args: Vec<String>,
}

impl ClipSynthesizer {
    pub fn new(transcoder: Arc<dyn Transcode>, render: RenderConfig, use_hardware: bool) -> Self {
        let encode_args = video_encode_args(&render, use_hardware);
        Self {
            transcoder,
            render,
            encode_args,
        }
    }

    /// Render one clip into `workspace`.
    pub async fn synthesize_clip(
        &self,
        plan: &ClipPlan,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> rf_core::Result<PathBuf> {
        let output = workspace.temp_file(&plan.file_name());
        let args = clip_args(plan, &output, &self.render, &self.encode_args);
        tracing::debug!(
            "clip {}: {:?} {:.2}s ({} frames)",
            plan.index,
            plan.motion,
            plan.encode_secs,
            plan.frames
        );
        self.transcoder.run(args, cancel).await?;
        Ok(output)
    }

    /// Render every scene image. The returned paths follow scene order; the
    /// first failure aborts the batch and drops the in-flight invocations.
    pub async fn synthesize_all(
        &self,
        images: &[SceneImage],
        workspace: &Workspace,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> rf_core::Result<Vec<PathBuf>> {
        if self.render.fps == 0 {
            return Err(rf_core::Error::Validation("render.fps must be positive".into()));
        }

        let plans = plan_clips(images, self.render.transition_secs, self.render.fps);
        let counter = progress.counter(plans.len());

        let mut rendered: Vec<(usize, PathBuf)> = stream::iter(plans.iter())
            .map(|plan| {
                let counter = &counter;
                async move {
                    let path = self.synthesize_clip(plan, workspace, cancel).await?;
                    counter.tick();
                    Ok::<_, rf_core::Error>((plan.index, path))
                }
            })
            .buffer_unordered(self.render.clip_concurrency.max(1))
            .try_collect()
            .await?;

        rendered.sort_by_key(|(index, _)| *index);
        Ok(rendered.into_iter().map(|(_, path)| path).collect())
    }
}
