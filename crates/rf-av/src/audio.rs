//! Narration merge and background-music mixing.
//!
//! Narration parts are concatenated losslessly with the concat demuxer. When
//! background music is requested it is looped to the narration length, volume
//! shaped, faded, ducked under the narration with a sidechain compressor and
//! mixed in without renormalization.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rf_core::config::DuckingConfig;
use rf_core::{BgmSpec, StageProgress};
use tokio_util::sync::CancellationToken;

use crate::transcoder::Transcode;
use crate::transition::fmt_secs;
use crate::workspace::Workspace;

/// Label of the final mixed audio stream.
pub const AUDIO_OUTPUT_LABEL: &str = "aout";

/// Concat demuxer list for `parts`, in order.
pub fn concat_list(parts: &[PathBuf]) -> String {
    let mut list = String::new();
    for part in parts {
        let escaped = part.to_string_lossy().replace('\'', r"'\''");
        let _ = writeln!(list, "file '{escaped}'");
    }
    list
}

/// Arguments for a stream-copy concat of `list` into `output`.
pub fn merge_args(list: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Concatenate narration parts in order without re-encoding.
///
/// A single part is returned as-is.
pub async fn merge_narration(
    transcoder: &dyn Transcode,
    parts: &[PathBuf],
    workspace: &Workspace,
    cancel: &CancellationToken,
) -> rf_core::Result<PathBuf> {
    match parts {
        [] => Err(rf_core::Error::Validation("no narration parts to merge".into())),
        [only] => Ok(only.clone()),
        _ => {
            let ext = parts[0]
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| "wav".into());
            let list = workspace.temp_file("narration.txt");
            let output = workspace.temp_file(&format!("narration.{ext}"));
            tokio::fs::write(&list, concat_list(parts)).await?;
            tracing::debug!("merging {} narration parts", parts.len());
            transcoder.run(merge_args(&list, &output), cancel).await?;
            Ok(output)
        }
    }
}

/// When the music fade-out begins so that it ends with the narration.
pub fn fade_out_start(narration_secs: f64, fade_out_secs: f64) -> f64 {
    (narration_secs - fade_out_secs).max(0.0)
}

/// Filter graph mixing narration (input 0) with looped music (input 1).
pub fn bgm_filter(bgm: &BgmSpec, narration_secs: f64, ducking: &DuckingConfig) -> String {
    let mut music = format!(
        "[1:a]atrim=0:{},asetpts=PTS-STARTPTS,volume={:.2}",
        fmt_secs(narration_secs),
        bgm.volume
    );
    if bgm.fade_in_secs > 0.0 {
        let _ = write!(music, ",afade=t=in:st=0:d={}", fmt_secs(bgm.fade_in_secs));
    }
    if bgm.fade_out_secs > 0.0 {
        let start = fade_out_start(narration_secs, bgm.fade_out_secs);
        let _ = write!(
            music,
            ",afade=t=out:st={}:d={}",
            fmt_secs(start),
            fmt_secs(narration_secs - start)
        );
    }

    format!(
        "[0:a]asplit=2[narr][key];\
         {music}[music];\
         [music][key]sidechaincompress=threshold={}:ratio={}:attack={}:release={}[ducked];\
         [narr][ducked]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[{AUDIO_OUTPUT_LABEL}]",
        ducking.threshold, ducking.ratio, ducking.attack_ms, ducking.release_ms
    )
}

/// Arguments for the background-music mix.
pub fn bgm_args(narration: &Path, bgm: &BgmSpec, filter: &str, narration_secs: f64, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        narration.to_string_lossy().into_owned(),
        "-stream_loop".into(),
        "-1".into(),
        "-i".into(),
        bgm.file_path.to_string_lossy().into_owned(),
        "-filter_complex".into(),
        filter.to_string(),
        "-map".into(),
        format!("[{AUDIO_OUTPUT_LABEL}]"),
        "-t".into(),
        fmt_secs(narration_secs),
        "-c:a".into(),
        "pcm_s16le".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Mix background music under `narration`.
///
/// The narration duration is probed; when it is unknown the mix is skipped
/// and `narration` is returned unchanged.
pub async fn mix_bgm(
    transcoder: &dyn Transcode,
    narration: &Path,
    bgm: &BgmSpec,
    ducking: &DuckingConfig,
    workspace: &Workspace,
    progress: &StageProgress,
    cancel: &CancellationToken,
) -> rf_core::Result<PathBuf> {
    let narration_secs = transcoder.probe_duration(narration).await;
    if narration_secs <= 0.0 {
        tracing::warn!(
            "could not determine duration of {}; skipping background music",
            narration.display()
        );
        return Ok(narration.to_path_buf());
    }

    let filter = bgm_filter(bgm, narration_secs, ducking);
    let output = workspace.temp_file("mixed.wav");
    tracing::debug!(
        "mixing background music (narration {:.2}s, fade-out at {:.2}s)",
        narration_secs,
        fade_out_start(narration_secs, bgm.fade_out_secs)
    );
    transcoder
        .run_with_progress(
            bgm_args(narration, bgm, &filter, narration_secs, &output),
            narration_secs,
            progress,
            cancel,
        )
        .await?;
    Ok(output)
}
