//! A recording [`Transcode`] fake.
//!
//! Records every invocation, writes a small placeholder to the output path
//! (the last argument) and answers probes from a table. Used by the unit
//! tests here and, through the `testing` feature, by downstream crates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rf_core::StageProgress;
use tokio_util::sync::CancellationToken;

use crate::transcoder::Transcode;

#[derive(Debug, Default)]
pub struct FakeTranscoder {
    durations: HashMap<PathBuf, f64>,
    default_duration: f64,
    fail_when: Option<String>,
    delay: Duration,
    invocations: Mutex<Vec<Vec<String>>>,
    probes: Mutex<Vec<PathBuf>>,
    scripts: Mutex<Vec<String>>,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe result for `path`.
    pub fn with_duration(mut self, path: impl Into<PathBuf>, secs: f64) -> Self {
        self.durations.insert(path.into(), secs);
        self
    }

    /// Probe result for paths without an explicit entry.
    pub fn with_default_duration(mut self, secs: f64) -> Self {
        self.default_duration = secs;
        self
    }

    /// Fail any invocation with an argument containing `needle`.
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_when = Some(needle.into());
        self
    }

    /// Make every invocation take `delay` (cancellable).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().clone()
    }

    pub fn probes(&self) -> Vec<PathBuf> {
        self.probes.lock().clone()
    }

    /// Contents of every `-filter_complex_script` file seen, read at call time.
    pub fn filter_scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }

    /// Invocations with an argument containing `needle`.
    pub fn invocations_with(&self, needle: &str) -> Vec<Vec<String>> {
        self.invocations
            .lock()
            .iter()
            .filter(|args| args.iter().any(|a| a.contains(needle)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transcode for FakeTranscoder {
    async fn run(&self, args: Vec<String>, cancel: &CancellationToken) -> rf_core::Result<()> {
        if cancel.is_cancelled() {
            return Err(rf_core::Error::Cancelled);
        }
        self.invocations.lock().push(args.clone());

        if let Some(pos) = args.iter().position(|a| a == "-filter_complex_script") {
            if let Some(script) = args.get(pos + 1) {
                let text = tokio::fs::read_to_string(script).await?;
                self.scripts.lock().push(text);
            }
        }

        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(rf_core::Error::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        if let Some(ref needle) = self.fail_when {
            if args.iter().any(|a| a.contains(needle.as_str())) {
                return Err(rf_core::Error::TranscodeFailure {
                    tool: "ffmpeg".into(),
                    exit_code: Some(1),
                    diagnostics: format!("simulated failure on {needle}"),
                });
            }
        }

        if let Some(output) = args.last() {
            let output = Path::new(output);
            if let Some(parent) = output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(output, b"fake media").await?;
        }
        Ok(())
    }

    async fn run_with_progress(
        &self,
        args: Vec<String>,
        expected_total_secs: f64,
        progress: &StageProgress,
        cancel: &CancellationToken,
    ) -> rf_core::Result<()> {
        self.run(args, cancel).await?;
        if expected_total_secs > 0.0 {
            progress.report_ratio(1.0);
        }
        Ok(())
    }

    async fn probe_duration(&self, path: &Path) -> f64 {
        self.probes.lock().push(path.to_path_buf());
        self.durations
            .get(path)
            .copied()
            .unwrap_or(self.default_duration)
    }
}
