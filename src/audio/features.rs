//! Audio sub-score derivation
//!
//! Raw (unsmoothed) sub-scores for one VAD frame. Baseline-relative terms use
//! the ambient calibration captured at session start.

use crate::baseline::CalibrationBaseline;
use crate::config::{AudioConfig, AudioWeights};
use crate::fusion::MouthMotion;
use crate::types::AudioSample;

/// Smoothed audio sub-scores
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioSubScores {
    pub speech: f64,
    pub near_field: f64,
    pub duration: f64,
    pub repetition: f64,
    pub lip_sync: f64,
}

/// Speech gate. Quiet rooms lower it, loud rooms raise it.
pub fn adaptive_gate(baseline: Option<&CalibrationBaseline>, config: &AudioConfig) -> f64 {
    match baseline {
        Some(b) if b.complete => {
            let rms = b.get("rms");
            config.min_gate.max(0.5 - 0.15 + rms / 50.0 * 0.2)
        }
        _ => config.static_gate,
    }
}

/// Whether a frame carries enough speech probability to be scored
pub fn passes_gate(vad_probability: f64, gate: f64, config: &AudioConfig) -> bool {
    vad_probability > config.gate_factor * gate
}

/// Near-field score: loud, voice-band heavy, tonal audio relative to the room.
///
/// Only part of each baseline is subtracted (0.5x RMS, 0.3x voice band).
pub fn near_field_raw(sample: &AudioSample, baseline: &CalibrationBaseline) -> f64 {
    let rms_term = ((sample.rms - 0.5 * baseline.get("rms")).max(0.0) / 50.0).min(1.0);
    let voice_term =
        ((sample.voice_band_ratio - 0.3 * baseline.get("voice_band_ratio")).max(0.0) * 1.5).min(1.0);
    let tonal_term = (1.0 - sample.spectral_flatness).max(0.0).min(1.0);

    (0.4 * rms_term + 0.35 * voice_term + 0.25 * tonal_term).clamp(0.0, 1.0)
}

/// Lip-sync score from the latest mouth motion seen by the camera.
///
/// Moving lips score 1, still lips during confident speech score 0 (someone
/// else is talking), anything else is neutral. Without camera data the score
/// is neutral.
pub fn lip_sync_raw(motion: Option<MouthMotion>, vad_probability: f64, config: &AudioConfig) -> f64 {
    let Some(motion) = motion else {
        return 0.5;
    };
    let velocity = motion.velocity as f64;
    let openness = motion.openness as f64;

    if velocity > config.lip_velocity_active || openness > config.lip_openness_active {
        1.0
    } else if vad_probability > config.lip_speech_vad && velocity < config.lip_velocity_still {
        0.0
    } else {
        0.5
    }
}

/// Weighted sum of smoothed sub-scores
pub fn weighted_composite(scores: &AudioSubScores, weights: &AudioWeights) -> f64 {
    (weights.speech * scores.speech
        + weights.near_field * scores.near_field
        + weights.duration * scores.duration
        + weights.repetition * scores.repetition
        + weights.lip_sync * scores.lip_sync)
        .clamp(0.0, 1.0)
}

/// Reason for an audio flag: the largest weighted contributor
pub fn flag_message(scores: &AudioSubScores, weights: &AudioWeights) -> &'static str {
    let contributions = [
        (weights.speech * scores.speech, "Speech detected"),
        (weights.near_field * scores.near_field, "Nearby voice detected"),
        (weights.duration * scores.duration, "Sustained talking detected"),
        (weights.repetition * scores.repetition, "Repeated talking detected"),
        (weights.lip_sync * scores.lip_sync, "Speech matches mouth movement"),
    ];
    contributions
        .iter()
        .fold((f64::MIN, "Suspicious audio"), |best, &(value, msg)| {
            if value > best.0 {
                (value, msg)
            } else {
                best
            }
        })
        .1
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn baseline(rms: f64, voice: f64) -> CalibrationBaseline {
        let mut means = BTreeMap::new();
        means.insert("rms".to_string(), rms);
        means.insert("voice_band_ratio".to_string(), voice);
        means.insert("spectral_flatness".to_string(), 0.7);
        CalibrationBaseline {
            means,
            sample_count: 50,
            complete: true,
        }
    }

    fn sample(rms: f64, voice: f64, flat: f64) -> AudioSample {
        AudioSample {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            vad_probability: 0.9,
            rms,
            voice_band_ratio: voice,
            spectral_flatness: flat,
        }
    }

    #[test]
    fn test_gate_static_until_calibrated() {
        let config = AudioConfig::default();
        assert_eq!(adaptive_gate(None, &config), 0.5);

        let incomplete = CalibrationBaseline::default();
        assert_eq!(adaptive_gate(Some(&incomplete), &config), 0.5);
    }

    #[test]
    fn test_gate_adapts_to_room_level() {
        let config = AudioConfig::default();
        assert!((adaptive_gate(Some(&baseline(0.0, 0.2)), &config) - 0.35).abs() < 1e-12);
        assert!((adaptive_gate(Some(&baseline(50.0, 0.2)), &config) - 0.55).abs() < 1e-12);

        // Never below the floor
        let low = AudioConfig {
            min_gate: 0.4,
            ..AudioConfig::default()
        };
        assert_eq!(adaptive_gate(Some(&baseline(0.0, 0.2)), &low), 0.4);
    }

    #[test]
    fn test_passes_gate_uses_factor() {
        let config = AudioConfig::default();
        assert!(passes_gate(0.41, 0.5, &config));
        assert!(!passes_gate(0.40, 0.5, &config));
    }

    #[test]
    fn test_near_field_partial_baseline_subtraction() {
        let b = baseline(20.0, 0.5);
        // rms term: (30 - 10) / 50 = 0.4; voice: (0.6 - 0.15) * 1.5 = 0.675; tonal: 0.5
        let expected = 0.4 * 0.4 + 0.35 * 0.675 + 0.25 * 0.5;
        assert!((near_field_raw(&sample(30.0, 0.6, 0.5), &b) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_near_field_saturates() {
        let b = baseline(0.0, 0.0);
        assert!((near_field_raw(&sample(500.0, 1.0, 0.0), &b) - 1.0).abs() < 1e-12);
        assert_eq!(near_field_raw(&sample(0.0, 0.0, 1.0), &b), 0.0);
    }

    #[test]
    fn test_lip_sync_cases() {
        let config = AudioConfig::default();
        let moving = MouthMotion {
            openness: 0.1,
            velocity: 0.08,
        };
        let open = MouthMotion {
            openness: 0.4,
            velocity: 0.0,
        };
        let still = MouthMotion {
            openness: 0.1,
            velocity: 0.01,
        };

        assert_eq!(lip_sync_raw(Some(moving), 0.9, &config), 1.0);
        assert_eq!(lip_sync_raw(Some(open), 0.9, &config), 1.0);
        assert_eq!(lip_sync_raw(Some(still), 0.9, &config), 0.0);
        assert_eq!(lip_sync_raw(Some(still), 0.3, &config), 0.5);
        assert_eq!(lip_sync_raw(None, 0.9, &config), 0.5);
    }

    #[test]
    fn test_weighted_composite_bounds() {
        let weights = AudioWeights::default();
        let max = AudioSubScores {
            speech: 1.0,
            near_field: 1.0,
            duration: 1.0,
            repetition: 1.0,
            lip_sync: 1.0,
        };
        assert!((weighted_composite(&max, &weights) - 1.0).abs() < 1e-12);
        assert_eq!(weighted_composite(&AudioSubScores::default(), &weights), 0.0);
    }
}
