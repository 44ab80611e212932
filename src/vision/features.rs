//! Vision sub-score derivation
//!
//! Raw (unsmoothed) sub-scores computed from a single frame's features.
//! Each function returns a value in [0, 1].

use crate::config::{VisionConfig, VisionWeights};
use std::collections::VecDeque;

/// Smoothed vision sub-scores
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VisionSubScores {
    pub gaze: f64,
    pub pose: f64,
    pub duration: f64,
    pub repetition: f64,
    pub lip: f64,
}

/// Horizontal component of the gaze score.
///
/// Outside the on-screen thresholds the subject is looking away. Inside the
/// grace band they are not. Between the two (only reachable when the grace
/// band is configured narrower than the thresholds) the previous value holds.
pub fn horizontal_gaze_raw(h: f64, previous: f64, config: &VisionConfig) -> f64 {
    if h < config.gaze_left_threshold || h > config.gaze_right_threshold {
        1.0
    } else if h >= config.gaze_grace_min && h <= config.gaze_grace_max {
        0.0
    } else {
        previous
    }
}

/// Full gaze score: horizontal component, raised when looking down
pub fn gaze_raw(horizontal: f64, v: f64, config: &VisionConfig) -> f64 {
    if v > config.gaze_down_threshold {
        horizontal.max(config.gaze_down_score)
    } else {
        horizontal
    }
}

/// Head pose score: 1 when turned or tilted beyond thresholds
pub fn pose_raw(yaw: f64, pitch: f64, config: &VisionConfig) -> f64 {
    if yaw.abs() > config.yaw_threshold || pitch > config.pitch_threshold {
        1.0
    } else {
        0.0
    }
}

/// Linear ramp from `onset_ms` to `full_ms` of continuous suspicious time
pub fn duration_raw(elapsed_ms: i64, onset_ms: i64, full_ms: i64) -> f64 {
    let span = (full_ms - onset_ms).max(1) as f64;
    ((elapsed_ms - onset_ms) as f64 / span).clamp(0.0, 1.0)
}

/// Saturating event count
pub fn repetition_raw(count: usize, saturation: u32) -> f64 {
    if saturation == 0 {
        return if count > 0 { 1.0 } else { 0.0 };
    }
    (count as f64 / saturation as f64).min(1.0)
}

/// Population variance of the given values
pub fn variance(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean: f64 = values.iter().sum::<f64>() / n;
    values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
}

/// Lip activity: varying, wide open, or moving sharply
pub fn lip_raw(history: &VecDeque<f64>, mar: f64, delta: f64, config: &VisionConfig) -> f64 {
    if variance(history) > config.lip_variance_threshold
        || mar > config.lip_open_threshold
        || delta.abs() > config.lip_delta_threshold
    {
        1.0
    } else {
        0.0
    }
}

/// Weighted sum of smoothed sub-scores
pub fn weighted_composite(scores: &VisionSubScores, weights: &VisionWeights) -> f64 {
    (weights.gaze * scores.gaze
        + weights.pose * scores.pose
        + weights.duration * scores.duration
        + weights.repetition * scores.repetition
        + weights.lip * scores.lip)
        .clamp(0.0, 1.0)
}

/// Composite before the second smoothing pass.
///
/// Smoothed gaze is a floor under the weighted sum, so sustained looking away
/// crosses the flag threshold within a few frames. Pose only contributes
/// through its weight; a brief head turn stays well below the threshold.
pub fn composite_raw(scores: &VisionSubScores, weights: &VisionWeights) -> f64 {
    weighted_composite(scores, weights)
        .max(scores.gaze)
        .clamp(0.0, 1.0)
}

/// Face-lost penalty: zero during the grace period, then a linear ramp to the cap
pub fn face_lost_penalty(lost_ms: i64, config: &VisionConfig) -> f64 {
    if lost_ms <= config.face_lost_grace_ms {
        return 0.0;
    }
    let ramp = config.face_lost_ramp_ms.max(1) as f64;
    let progress = ((lost_ms - config.face_lost_grace_ms) as f64 / ramp).clamp(0.0, 1.0);
    config.face_lost_penalty_cap * progress
}

/// Human-readable reason for a vision flag, by priority
pub fn flag_message(scores: &VisionSubScores, weights: &VisionWeights) -> &'static str {
    if scores.gaze > 0.5 && scores.pose > 0.5 {
        return "Looking away with head turned from screen";
    }

    let contributions = [
        (weights.gaze * scores.gaze, "Looking away from screen"),
        (weights.pose * scores.pose, "Head turned away from screen"),
        (weights.duration * scores.duration, "Prolonged off-screen attention"),
        (weights.repetition * scores.repetition, "Repeatedly looking away"),
        (weights.lip * scores.lip, "Mouth movement detected"),
    ];
    contributions
        .iter()
        .fold((f64::MIN, "Suspicious visual behavior"), |best, &(value, msg)| {
            if value > best.0 {
                (value, msg)
            } else {
                best
            }
        })
        .1
}
