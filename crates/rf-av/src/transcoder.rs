//! The transcoder seam.
//!
//! Every component that needs ffmpeg talks to a [`Transcode`] implementation
//! rather than spawning processes itself. [`FfmpegTranscoder`] is the real
//! one; tests substitute a recording fake.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rf_core::StageProgress;
use tokio_util::sync::CancellationToken;

use crate::command::{parse_time_marker, ToolCommand};
use crate::tools::ToolRegistry;

/// Runs transcoder invocations and probes media durations.
#[async_trait]
pub trait Transcode: Send + Sync {
    /// Run one invocation to completion.
    async fn run(&self, args: Vec<String>, cancel: &CancellationToken) -> rf_core::Result<()>;

    /// Run one invocation, reporting `time=` position against
    /// `expected_total_secs` into `progress`.
    async fn run_with_progress(
        &self,
        args: Vec<String>,
        expected_total_secs: f64,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> rf_core::Result<()>;

    /// Media duration in seconds; `0.0` when unknown.
    async fn probe_duration(&self, path: &Path) -> f64;
}

/// [`Transcode`] backed by the ffmpeg and ffprobe executables.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, timeout: Duration) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            timeout,
        }
    }

    /// Build from discovered tools; both ffmpeg and ffprobe are required.
    pub fn from_registry(tools: &ToolRegistry, timeout: Duration) -> rf_core::Result<Self> {
        let ffmpeg = tools.require("ffmpeg")?.path.clone();
        let ffprobe = tools.require("ffprobe")?.path.clone();
        Ok(Self::new(ffmpeg, ffprobe, timeout))
    }

    fn command(&self, args: Vec<String>) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.timeout(self.timeout).args(["-hide_banner", "-nostdin"]).args(args);
        cmd
    }
}

#[async_trait]
impl Transcode for FfmpegTranscoder {
    async fn run(&self, args: Vec<String>, cancel: &CancellationToken) -> rf_core::Result<()> {
        self.command(args).execute(cancel).await?;
        Ok(())
    }

    async fn run_with_progress(
        &self,
        args: Vec<String>,
        expected_total_secs: f64,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> rf_core::Result<()> {
        self.command(args)
            .execute_with_diagnostics(cancel, |line| {
                if expected_total_secs <= 0.0 {
                    return;
                }
                if let Some(position) = parse_time_marker(line) {
                    progress.report_ratio(position / expected_total_secs);
                }
            })
            .await?;
        Ok(())
    }

    async fn probe_duration(&self, path: &Path) -> f64 {
        crate::probe::probe_duration(&self.ffprobe, path).await
    }
}
