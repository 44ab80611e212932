//! Core data types
//!
//! This module defines the samples, snapshots, flags, and evidence records that
//! flow between the feature adapters, the scorers, and the session controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Capture modality a signal originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Vision,
    Audio,
    Identity,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Vision => "vision",
            Modality::Audio => "audio",
            Modality::Identity => "identity",
        }
    }
}

/// Capture device that can fail independently of scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Camera,
    Microphone,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Camera => "camera",
            Device::Microphone => "microphone",
        }
    }
}

/// Per-frame vision features produced by the face adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionSample {
    /// Capture time of the frame
    pub timestamp: DateTime<Utc>,
    /// Number of faces detected in the frame
    pub face_count: u32,
    /// Horizontal gaze ratio (0 = far left, 1 = far right)
    #[serde(default = "neutral_ratio")]
    pub gaze_h: f64,
    /// Vertical gaze ratio (0 = up, 1 = down)
    #[serde(default = "neutral_ratio")]
    pub gaze_v: f64,
    /// Normalized head yaw estimate (signed)
    #[serde(default)]
    pub yaw: f64,
    /// Normalized head pitch estimate (positive = looking down)
    #[serde(default)]
    pub pitch: f64,
    /// Mouth aspect ratio (opening height over width)
    #[serde(default)]
    pub mouth_aspect_ratio: f64,
}

fn neutral_ratio() -> f64 {
    0.5
}

impl VisionSample {
    /// A frame in which no face was detected
    pub fn no_face(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            face_count: 0,
            gaze_h: 0.5,
            gaze_v: 0.5,
            yaw: 0.0,
            pitch: 0.0,
            mouth_aspect_ratio: 0.0,
        }
    }
}

/// Per-frame audio features produced by the VAD adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSample {
    /// Capture time of the frame
    pub timestamp: DateTime<Utc>,
    /// Speech probability from the VAD (0-1)
    pub vad_probability: f64,
    /// Frame RMS level
    pub rms: f64,
    /// Share of energy in the voice band (0-1)
    pub voice_band_ratio: f64,
    /// Spectral flatness (0 = tonal, 1 = noise-like)
    pub spectral_flatness: f64,
}

/// A closed interval of suspicious behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousEvent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_ms: i64,
}

impl SuspiciousEvent {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            duration_ms: (end - start).num_milliseconds(),
        }
    }
}

/// Point-in-time risk estimate for one modality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    /// Modality this snapshot describes
    pub modality: Modality,
    /// Smoothed composite score (0-1)
    pub composite_score: f64,
    /// Named sub-scores plus optional raw debug metrics
    pub breakdown: BTreeMap<String, f64>,
    /// True while the scorer is still establishing its baseline
    #[serde(default)]
    pub is_calibrating: bool,
    /// Time the snapshot was computed for
    pub timestamp: DateTime<Utc>,
}

/// Result of one successful recognition pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySample {
    /// Embedding extracted from the observed face
    pub embedding: Vec<f32>,
    /// Cosine similarity against the reference centroid, if one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    /// Probability that the observed face is a live person
    pub liveness_probability: f64,
}

impl IdentitySample {
    pub fn spoof_probability(&self) -> f64 {
        (1.0 - self.liveness_probability).clamp(0.0, 1.0)
    }
}

/// Flag severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Two-tier severity for external consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTier {
    /// Reviewable, does not end the session on its own
    Advisory,
    /// Expected to trigger termination by the session controller
    Critical,
}

impl Severity {
    pub fn tier(&self) -> SeverityTier {
        match self {
            Severity::Low | Severity::Medium => SeverityTier::Advisory,
            Severity::High => SeverityTier::Critical,
        }
    }
}

/// Logical flag kinds, each with its own debounce clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    /// Vision composite crossed its threshold
    VisionRisk,
    /// Face missing from the camera for too long
    FaceNotDetected,
    /// More than one face in the camera frame
    MultipleFaces,
    /// Audio composite crossed its threshold
    AudioRisk,
    /// Identity check found nobody for several ticks
    IdentityMissing,
    /// Identity check found several people for several ticks
    IdentityMultipleFaces,
    /// Liveness check rejected the observed face
    SpoofDetected,
    /// Low similarity combined with elevated spoof probability
    Impersonation,
    /// Consecutive low-similarity recognitions
    IdentityMismatch,
    /// Camera or microphone stopped delivering data
    DeviceError,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::VisionRisk => "vision_risk",
            FlagType::FaceNotDetected => "face_not_detected",
            FlagType::MultipleFaces => "multiple_faces",
            FlagType::AudioRisk => "audio_risk",
            FlagType::IdentityMissing => "identity_missing",
            FlagType::IdentityMultipleFaces => "identity_multiple_faces",
            FlagType::SpoofDetected => "spoof_detected",
            FlagType::Impersonation => "impersonation",
            FlagType::IdentityMismatch => "identity_mismatch",
            FlagType::DeviceError => "device_error",
        }
    }
}

/// A debounced flag for the session controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Storage key of the evidence clip captured for this flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_ref: Option<String>,
}

impl Flag {
    pub fn new(
        flag_type: FlagType,
        severity: Severity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            flag_type,
            severity,
            message: message.into(),
            timestamp,
            evidence_ref: None,
        }
    }
}

/// Upload lifecycle of an evidence clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Queued,
    Uploading,
    Linked,
    Failed,
}

/// Evidence captured around a flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceClip {
    pub session_id: String,
    pub flag_id: Uuid,
    /// Destination key the clip is uploaded under
    pub media_ref: String,
    pub upload_state: UploadState,
}
