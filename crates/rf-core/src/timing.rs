//! Scene duration allocation.
//!
//! A part's narration duration is split across its scenes in proportion to
//! their narration text length, with every scene held on screen for at least
//! [`MIN_SCENE_SECS`].
//!
//! When many scenes hit the floor the allocated total can exceed the
//! narration duration: floors are re-applied after the rescale, so the sum is
//! close to, but not guaranteed equal to, the narration length.

/// Shortest time any scene is shown.
pub const MIN_SCENE_SECS: f64 = 3.0;

/// Raw-sum deviation beyond which durations are rescaled.
const RESCALE_TOLERANCE_SECS: f64 = 0.1;

/// Split `narration_secs` across scenes weighted by `text_lengths`.
///
/// Returns one duration per entry of `text_lengths`. If every length is zero
/// the scenes share the narration evenly.
pub fn allocate_scene_durations(narration_secs: f64, text_lengths: &[usize]) -> Vec<f64> {
    if text_lengths.is_empty() {
        return Vec::new();
    }

    let total_len: usize = text_lengths.iter().sum();
    let mut durations: Vec<f64> = if total_len == 0 {
        let even = narration_secs / text_lengths.len() as f64;
        vec![even.max(MIN_SCENE_SECS); text_lengths.len()]
    } else {
        text_lengths
            .iter()
            .map(|&l| (narration_secs * l as f64 / total_len as f64).max(MIN_SCENE_SECS))
            .collect()
    };

    let sum: f64 = durations.iter().sum();
    if (sum - narration_secs).abs() > RESCALE_TOLERANCE_SECS && sum > 0.0 {
        let ratio = narration_secs / sum;
        for d in &mut durations {
            *d = (*d * ratio).max(MIN_SCENE_SECS);
        }
    }

    durations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(v: &[f64]) -> f64 {
        v.iter().sum()
    }

    #[test]
    fn equal_lengths_split_evenly() {
        let d = allocate_scene_durations(40.0, &[10, 10, 10, 10, 10]);
        assert_eq!(d, vec![8.0; 5]);
    }

    #[test]
    fn proportional_to_text_length() {
        let d = allocate_scene_durations(30.0, &[10, 20, 30]);
        assert!((d[0] - 5.0).abs() < 1e-9);
        assert!((d[1] - 10.0).abs() < 1e-9);
        assert!((d[2] - 15.0).abs() < 1e-9);
    }

    #[test]
    fn short_scenes_are_floored() {
        let d = allocate_scene_durations(20.0, &[1, 100]);
        assert_eq!(d[0], MIN_SCENE_SECS);
        assert!(d[1] > 17.0);
        // one clamped scene: the total overshoots by less than one floor
        assert!((sum(&d) - 20.0).abs() < MIN_SCENE_SECS);
    }

    #[test]
    fn floor_dominated_total_exceeds_narration() {
        // Four scenes cannot fit in 6 s at 3 s each.
        let d = allocate_scene_durations(6.0, &[5, 5, 5, 5]);
        assert_eq!(d, vec![MIN_SCENE_SECS; 4]);
        assert!(sum(&d) > 6.0);
    }

    #[test]
    fn zero_lengths_share_evenly() {
        let d = allocate_scene_durations(12.0, &[0, 0, 0]);
        assert_eq!(d, vec![4.0; 3]);
    }

    #[test]
    fn empty_input() {
        assert!(allocate_scene_durations(10.0, &[]).is_empty());
    }

    #[test]
    fn drift_bounded_by_clamped_scenes() {
        let cases: Vec<(f64, Vec<usize>)> = vec![
            (60.0, vec![3, 50, 7, 120, 40]),
            (35.5, vec![12, 1, 1, 80]),
            (100.0, vec![5; 20]),
            (47.3, vec![200, 3, 3, 3, 90, 14]),
        ];
        for (narration, lengths) in cases {
            let d = allocate_scene_durations(narration, &lengths);
            assert!(d.iter().all(|&x| x >= MIN_SCENE_SECS), "{d:?}");
            let clamped = d.iter().filter(|&&x| x == MIN_SCENE_SECS).count();
            let drift = (sum(&d) - narration).abs();
            let bound = if clamped == 0 {
                0.1 * d.len() as f64
            } else {
                MIN_SCENE_SECS * clamped as f64
            };
            assert!(drift <= bound + 1e-9, "drift {drift} for {lengths:?}");
        }
    }

    #[test]
    fn mild_clamping_stays_within_tenth_per_scene() {
        let d = allocate_scene_durations(60.0, &[3, 50, 7, 120, 40]);
        assert!((sum(&d) - 60.0).abs() <= 0.1 * d.len() as f64);
    }
}
