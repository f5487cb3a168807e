//! Media duration probing via the `ffprobe` CLI.
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format` and reads
//! `format.duration`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::command::ToolCommand;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Extract the container duration from ffprobe's JSON output.
pub fn parse_probe_duration(json: &str) -> Option<f64> {
    let output: FfprobeOutput = serde_json::from_str(json).ok()?;
    let secs: f64 = output.format?.duration?.trim().parse().ok()?;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

/// Duration of `media` in seconds, or `0.0` when it cannot be determined.
///
/// Never fails: missing files, tool errors and unparseable output all yield
/// zero so callers can treat "unknown" uniformly.
pub async fn probe_duration(ffprobe: &Path, media: &Path) -> f64 {
    let result = ToolCommand::new(ffprobe.to_path_buf())
        .timeout(PROBE_TIMEOUT)
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(media.to_string_lossy())
        .execute(&CancellationToken::new())
        .await;

    match result {
        Ok(output) => parse_probe_duration(&output.stdout).unwrap_or_else(|| {
            tracing::warn!("ffprobe reported no duration for {}", media.display());
            0.0
        }),
        Err(e) => {
            tracing::warn!("ffprobe failed for {}: {e}", media.display());
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_format_duration() {
        let json = r#"{"format": {"filename": "a.wav", "duration": "12.345000", "bit_rate": "705600"}}"#;
        assert_eq!(parse_probe_duration(json), Some(12.345));
    }

    #[test]
    fn missing_or_bad_duration_is_none() {
        assert_eq!(parse_probe_duration(r#"{"format": {}}"#), None);
        assert_eq!(parse_probe_duration(r#"{}"#), None);
        assert_eq!(parse_probe_duration(r#"{"format": {"duration": "N/A"}}"#), None);
        assert_eq!(parse_probe_duration(r#"{"format": {"duration": "0.000"}}"#), None);
        assert_eq!(parse_probe_duration("not json"), None);
    }

    #[tokio::test]
    async fn missing_tool_yields_zero() {
        let d = probe_duration(
            &PathBuf::from("nonexistent_ffprobe_xyz"),
            &PathBuf::from("/nonexistent/a.wav"),
        )
        .await;
        assert_eq!(d, 0.0);
    }
}
