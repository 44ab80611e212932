//! Scorer configuration
//!
//! Every threshold, weight, and window used by the scorers lives here. The
//! defaults are the reference behavior; partial JSON overrides are merged over
//! them field by field.

use crate::error::ProctorError;
use serde::{Deserialize, Serialize};

/// Sub-score weights for the vision composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionWeights {
    pub gaze: f64,
    pub pose: f64,
    pub duration: f64,
    pub repetition: f64,
    pub lip: f64,
}

impl Default for VisionWeights {
    fn default() -> Self {
        Self {
            gaze: 0.35,
            pose: 0.25,
            duration: 0.15,
            repetition: 0.15,
            lip: 0.10,
        }
    }
}

impl VisionWeights {
    pub fn sum(&self) -> f64 {
        self.gaze + self.pose + self.duration + self.repetition + self.lip
    }
}

/// Vision scorer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub weights: VisionWeights,
    pub smoothing_alpha: f64,
    /// Horizontal gaze ratio below which the subject is looking away
    pub gaze_left_threshold: f64,
    /// Horizontal gaze ratio above which the subject is looking away
    pub gaze_right_threshold: f64,
    /// Band treated as on-screen gaze
    pub gaze_grace_min: f64,
    pub gaze_grace_max: f64,
    /// Vertical gaze ratio above which the subject is looking down
    pub gaze_down_threshold: f64,
    /// Raw gaze value applied when looking down
    pub gaze_down_score: f64,
    pub yaw_threshold: f64,
    pub pitch_threshold: f64,
    /// Suspicious time before the duration sub-score starts rising
    pub duration_onset_ms: i64,
    /// Suspicious time at which the duration sub-score saturates
    pub duration_full_ms: i64,
    /// Minimum suspicious interval that counts as a repetition event
    pub event_min_duration_ms: i64,
    /// Minimum spacing between two repetition events
    pub event_cooldown_ms: i64,
    pub repetition_window_ms: i64,
    /// Event count at which the repetition sub-score saturates
    pub repetition_saturation: u32,
    pub lip_history_len: usize,
    pub lip_variance_threshold: f64,
    pub lip_open_threshold: f64,
    pub lip_delta_threshold: f64,
    pub face_lost_grace_ms: i64,
    pub face_lost_ramp_ms: i64,
    pub face_lost_penalty_cap: f64,
    pub face_lost_flag_penalty: f64,
    pub face_lost_flag_after_ms: i64,
    pub flag_threshold: f64,
    pub flag_debounce_ms: i64,
    pub face_lost_debounce_ms: i64,
    pub multi_face_debounce_ms: i64,
    pub device_error_debounce_ms: i64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            weights: VisionWeights::default(),
            smoothing_alpha: 0.3,
            gaze_left_threshold: 0.30,
            gaze_right_threshold: 0.70,
            gaze_grace_min: 0.22,
            gaze_grace_max: 0.78,
            gaze_down_threshold: 0.4,
            gaze_down_score: 0.8,
            yaw_threshold: 0.25,
            pitch_threshold: 0.20,
            duration_onset_ms: 1_000,
            duration_full_ms: 5_000,
            event_min_duration_ms: 1_500,
            event_cooldown_ms: 3_000,
            repetition_window_ms: 300_000,
            repetition_saturation: 5,
            lip_history_len: 15,
            lip_variance_threshold: 0.003,
            lip_open_threshold: 0.5,
            lip_delta_threshold: 0.08,
            face_lost_grace_ms: 2_000,
            face_lost_ramp_ms: 5_000,
            face_lost_penalty_cap: 0.7,
            face_lost_flag_penalty: 0.60,
            face_lost_flag_after_ms: 5_000,
            flag_threshold: 0.60,
            flag_debounce_ms: 5_000,
            face_lost_debounce_ms: 5_000,
            multi_face_debounce_ms: 10_000,
            device_error_debounce_ms: 30_000,
        }
    }
}

/// Sub-score weights for the audio composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioWeights {
    pub speech: f64,
    pub near_field: f64,
    pub duration: f64,
    pub repetition: f64,
    pub lip_sync: f64,
}

impl Default for AudioWeights {
    fn default() -> Self {
        Self {
            speech: 0.40,
            near_field: 0.25,
            duration: 0.15,
            repetition: 0.10,
            lip_sync: 0.10,
        }
    }
}

impl AudioWeights {
    pub fn sum(&self) -> f64 {
        self.speech + self.near_field + self.duration + self.repetition + self.lip_sync
    }
}

/// Audio scorer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub weights: AudioWeights,
    pub smoothing_alpha: f64,
    pub calibration_ms: i64,
    /// Gate used before calibration completes
    pub static_gate: f64,
    pub min_gate: f64,
    /// Fraction of the gate the VAD probability must exceed
    pub gate_factor: f64,
    pub duration_onset_ms: i64,
    pub duration_full_ms: i64,
    pub segment_min_duration_ms: i64,
    pub repetition_window_ms: i64,
    pub repetition_saturation: u32,
    pub lip_velocity_active: f64,
    pub lip_openness_active: f64,
    pub lip_velocity_still: f64,
    pub lip_speech_vad: f64,
    pub flag_threshold: f64,
    pub flag_debounce_ms: i64,
    pub device_error_debounce_ms: i64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            weights: AudioWeights::default(),
            smoothing_alpha: 0.3,
            calibration_ms: 5_000,
            static_gate: 0.5,
            min_gate: 0.3,
            gate_factor: 0.8,
            duration_onset_ms: 500,
            duration_full_ms: 4_000,
            segment_min_duration_ms: 1_500,
            repetition_window_ms: 600_000,
            repetition_saturation: 5,
            lip_velocity_active: 0.05,
            lip_openness_active: 0.3,
            lip_velocity_still: 0.02,
            lip_speech_vad: 0.5,
            flag_threshold: 0.65,
            flag_debounce_ms: 5_000,
            device_error_debounce_ms: 30_000,
        }
    }
}

/// Identity verification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub tick_interval_ms: i64,
    pub match_threshold: f64,
    pub impersonation_similarity: f64,
    pub impersonation_spoof: f64,
    pub spoof_threshold: f64,
    pub missing_ticks: u32,
    pub multiple_ticks: u32,
    pub mismatch_ticks: u32,
    pub device_error_debounce_ms: i64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 7_000,
            match_threshold: 0.60,
            impersonation_similarity: 0.35,
            impersonation_spoof: 0.5,
            spoof_threshold: 0.75,
            missing_ticks: 3,
            multiple_ticks: 2,
            mismatch_ticks: 3,
            device_error_debounce_ms: 30_000,
        }
    }
}

/// Evidence capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    pub retention_ms: i64,
    pub stop_grace_ms: i64,
    pub clip_seconds: u32,
    pub retry_delay_ms: i64,
    pub content_type: String,
    pub key_prefix: String,
    /// Severities at or above this level capture a clip
    pub capture_min_severity: crate::types::Severity,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            retention_ms: 30_000,
            stop_grace_ms: 15_000,
            clip_seconds: 10,
            retry_delay_ms: 5_000,
            content_type: "video/webm".to_string(),
            key_prefix: "evidence".to_string(),
            capture_min_severity: crate::types::Severity::Medium,
        }
    }
}

/// Full per-session configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctorConfig {
    pub vision: VisionConfig,
    pub audio: AudioConfig,
    pub identity: IdentityConfig,
    pub evidence: EvidenceConfig,
}

const WEIGHT_TOLERANCE: f64 = 1e-9;

impl ProctorConfig {
    /// Parse a configuration, filling unspecified fields with defaults
    pub fn from_json(json: &str) -> Result<Self, ProctorError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ProctorError> {
        serde_json::to_string_pretty(self).map_err(ProctorError::JsonError)
    }

    /// Check invariants the scorers rely on
    pub fn validate(&self) -> Result<(), ProctorError> {
        let vision_sum = self.vision.weights.sum();
        if (vision_sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ProctorError::InvalidConfig(format!(
                "vision weights sum to {vision_sum}, expected 1.0"
            )));
        }
        let audio_sum = self.audio.weights.sum();
        if (audio_sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ProctorError::InvalidConfig(format!(
                "audio weights sum to {audio_sum}, expected 1.0"
            )));
        }
        for (name, alpha) in [
            ("vision.smoothing_alpha", self.vision.smoothing_alpha),
            ("audio.smoothing_alpha", self.audio.smoothing_alpha),
        ] {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(ProctorError::InvalidConfig(format!(
                    "{name} must be in (0, 1], got {alpha}"
                )));
            }
        }
        check_positive("vision.repetition_window_ms", self.vision.repetition_window_ms)?;
        check_positive(
            "vision duration ramp",
            self.vision.duration_full_ms - self.vision.duration_onset_ms,
        )?;
        check_positive("audio.repetition_window_ms", self.audio.repetition_window_ms)?;
        check_positive(
            "audio duration ramp",
            self.audio.duration_full_ms - self.audio.duration_onset_ms,
        )?;
        check_positive("identity.tick_interval_ms", self.identity.tick_interval_ms)?;
        check_positive("evidence.retention_ms", self.evidence.retention_ms)?;
        if self.vision.lip_history_len == 0 {
            return Err(ProctorError::InvalidConfig(
                "vision.lip_history_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_positive(name: &str, value: i64) -> Result<(), ProctorError> {
    if value <= 0 {
        return Err(ProctorError::InvalidConfig(format!(
            "{name} must be positive, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let config = ProctorConfig::default();
        assert!((config.vision.weights.sum() - 1.0).abs() < 1e-12);
        assert!((config.audio.weights.sum() - 1.0).abs() < 1e-12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ProctorConfig::from_json(r#"{"audio": {"flag_threshold": 0.7}}"#).unwrap();
        assert_eq!(config.audio.flag_threshold, 0.7);
        assert_eq!(config.audio.calibration_ms, 5_000);
        assert_eq!(config.vision, VisionConfig::default());
    }

    #[test]
    fn test_rejects_unbalanced_weights() {
        let json = r#"{"vision": {"weights": {"gaze": 0.5}}}"#;
        let err = ProctorConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("vision weights"));
    }

    #[test]
    fn test_rejects_inverted_duration_ramp() {
        let json = r#"{"audio": {"duration_onset_ms": 5000, "duration_full_ms": 4000}}"#;
        let err = ProctorConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("audio duration ramp"));
    }

    #[test]
    fn test_round_trip_json() {
        let config = ProctorConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(ProctorConfig::from_json(&json).unwrap(), config);
    }
}
