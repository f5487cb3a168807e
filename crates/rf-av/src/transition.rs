//! Cross-fade filter graph construction.
//!
//! Stage `i` blends the running composite with clip `i` at an offset equal to
//! the cumulative logical duration of clips `0..i`. Intermediate outputs are
//! labelled `tmp0`, `tmp1`, ... and the last stage writes [`OUTPUT_LABEL`].

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Label of the composited video stream.
pub const OUTPUT_LABEL: &str = "vout";

/// Fixed-point, locale-independent seconds for filter arguments.
pub fn fmt_secs(secs: f64) -> String {
    format!("{secs:.2}")
}

/// A built cross-fade chain.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionGraph {
    /// Filter graph text for `-filter_complex_script`.
    pub filter: String,
    /// Offset of each stage, in order.
    pub offsets: Vec<f64>,
}

impl TransitionGraph {
    /// Number of cross-fade stages.
    pub fn stage_count(&self) -> usize {
        self.offsets.len()
    }

    /// Write the graph to `path` so it can be passed by file reference.
    pub async fn write_script(&self, path: &Path) -> rf_core::Result<()> {
        tokio::fs::write(path, &self.filter).await?;
        Ok(())
    }
}

/// Build the cross-fade graph for `clip_paths` with logical `durations`.
///
/// Inputs are referenced by position (`[0:v]`, `[1:v]`, ...). Returns
/// `Ok(None)` for a single clip, which needs no graph.
///
/// # Errors
///
/// Returns [`rf_core::Error::Validation`] when there are no clips or the
/// duration count does not match the clip count.
pub fn build_graph(
    clip_paths: &[PathBuf],
    durations: &[f64],
    transition_secs: f64,
) -> rf_core::Result<Option<TransitionGraph>> {
    if clip_paths.is_empty() {
        return Err(rf_core::Error::Validation("no clips to transition".into()));
    }
    if clip_paths.len() != durations.len() {
        return Err(rf_core::Error::Validation(format!(
            "{} clips but {} durations",
            clip_paths.len(),
            durations.len()
        )));
    }
    if clip_paths.len() == 1 {
        return Ok(None);
    }

    let stages = clip_paths.len() - 1;
    let fade = fmt_secs(transition_secs);
    let mut filter = String::new();
    let mut offsets = Vec::with_capacity(stages);
    let mut cumulative = 0.0;
    let mut prev = "0:v".to_string();

    for i in 1..clip_paths.len() {
        cumulative += durations[i - 1];
        offsets.push(cumulative);

        let out = if i == stages {
            OUTPUT_LABEL.to_string()
        } else {
            format!("tmp{}", i - 1)
        };
        if !filter.is_empty() {
            filter.push(';');
        }
        let _ = write!(
            filter,
            "[{prev}][{i}:v]xfade=transition=fade:duration={fade}:offset={}[{out}]",
            fmt_secs(cumulative)
        );
        prev = out;
    }

    Ok(Some(TransitionGraph { filter, offsets }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clips(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("clip_{i:03}.mp4"))).collect()
    }

    #[test]
    fn single_clip_builds_no_graph() {
        assert_eq!(build_graph(&clips(1), &[5.0], 1.0).unwrap(), None);
    }

    #[test]
    fn empty_or_mismatched_is_error() {
        assert!(build_graph(&[], &[], 1.0).is_err());
        assert!(build_graph(&clips(3), &[1.0, 2.0], 1.0).is_err());
    }

    #[test]
    fn two_clips_write_output_label_directly() {
        let graph = build_graph(&clips(2), &[4.0, 6.0], 1.0).unwrap().unwrap();
        assert_eq!(
            graph.filter,
            "[0:v][1:v]xfade=transition=fade:duration=1.00:offset=4.00[vout]"
        );
    }

    #[test]
    fn five_equal_scenes() {
        let graph = build_graph(&clips(5), &[8.0; 5], 1.0).unwrap().unwrap();
        assert_eq!(graph.stage_count(), 4);
        assert_eq!(graph.offsets, vec![8.0, 16.0, 24.0, 32.0]);
        assert_eq!(
            graph.filter,
            "[0:v][1:v]xfade=transition=fade:duration=1.00:offset=8.00[tmp0];\
             [tmp0][2:v]xfade=transition=fade:duration=1.00:offset=16.00[tmp1];\
             [tmp1][3:v]xfade=transition=fade:duration=1.00:offset=24.00[tmp2];\
             [tmp2][4:v]xfade=transition=fade:duration=1.00:offset=32.00[vout]"
        );
    }

    #[test]
    fn offsets_are_exact_cumulative_sums() {
        let durations = [3.0, 7.25, 4.333, 12.1, 3.0, 9.9];
        let graph = build_graph(&clips(6), &durations, 1.0).unwrap().unwrap();
        assert_eq!(graph.stage_count(), 5);
        assert_eq!(graph.filter.matches("xfade=").count(), 5);
        let mut expected = 0.0;
        for (i, offset) in graph.offsets.iter().enumerate() {
            expected += durations[i];
            assert!((offset - expected).abs() < 0.01);
            assert!(graph.filter.contains(&format!("offset={expected:.2}")));
        }
    }

    #[test]
    fn formatting_is_fixed_point() {
        assert_eq!(fmt_secs(7.0), "7.00");
        assert_eq!(fmt_secs(1.005_1), "1.01");
        assert_eq!(fmt_secs(1234.5), "1234.50");
    }

    #[tokio::test]
    async fn script_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let graph = build_graph(&clips(3), &[3.0, 3.0, 3.0], 1.0).unwrap().unwrap();
        let path = dir.path().join("graph.txt");
        graph.write_script(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), graph.filter);
    }
}
