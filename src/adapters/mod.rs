//! Feature adapters
//!
//! Capture-side interfaces: a face detector for vision, a VAD/feature
//! extractor for audio, and a detection backend for identity checks. Concrete
//! backends are chosen when the session is built; the scorers only see the
//! samples these produce.

pub mod face;

pub use face::{vision_sample, BoundingBox, FaceDetection, FaceMeta, Point};

use crate::error::ProctorError;
use crate::identity::IdentityObservation;
use crate::types::AudioSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audio sample rate adapters are fed at
pub const AUDIO_SAMPLE_RATE: u32 = 16_000;

/// One camera frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// Packed RGB8 pixels
    pub pixels: Vec<u8>,
}

/// Fixed-size block of 16 kHz mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub timestamp: DateTime<Utc>,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    /// Wall time covered by the frame
    pub fn duration_ms(&self) -> i64 {
        self.samples.len() as i64 * 1000 / AUDIO_SAMPLE_RATE as i64
    }
}

/// Segment boundary reported alongside a VAD frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechEvent {
    Start,
    End,
}

/// Per-frame output of an audio feature adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub vad_probability: f64,
    pub rms: f64,
    pub voice_band_ratio: f64,
    pub spectral_flatness: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_event: Option<SpeechEvent>,
}

impl AudioFeatures {
    pub fn to_sample(&self, timestamp: DateTime<Utc>) -> AudioSample {
        AudioSample {
            timestamp,
            vad_probability: self.vad_probability,
            rms: self.rms,
            voice_band_ratio: self.voice_band_ratio,
            spectral_flatness: self.spectral_flatness,
        }
    }
}

/// Camera feed polled by the session's capture loops
pub trait FrameSource: Send + Sync {
    /// Most recent frame, or `None` if the camera has nothing new
    fn latest_frame(&self) -> Option<VideoFrame>;
}

/// Face detector used by the vision scorer
pub trait VisionAdapter: Send {
    /// Zero or more faces, each with a bounding box and at least five landmarks
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<FaceDetection>, ProctorError>;
}

/// Speech probability and spectral features per audio frame
pub trait AudioFeatureAdapter: Send {
    fn analyze(&mut self, frame: &AudioFrame) -> Result<AudioFeatures, ProctorError>;
}

/// Detection backend for identity verification
pub trait FaceBackend: Send {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<FaceDetection>, ProctorError>;

    /// Fixed-length embedding of one face
    fn embed(&mut self, frame: &VideoFrame, face: &FaceDetection) -> Result<Vec<f32>, ProctorError>;

    /// Probability that the face is a replay or mask rather than a live person
    fn check_liveness(&mut self, frame: &VideoFrame, face: &FaceDetection)
        -> Result<f64, ProctorError>;
}

/// Run the identity backend over one frame.
///
/// Liveness and embedding only run when exactly one face is present, and the
/// embedding is skipped once the spoof probability exceeds `spoof_threshold`.
pub fn observe_identity(
    backend: &mut dyn FaceBackend,
    frame: &VideoFrame,
    spoof_threshold: f64,
) -> Result<IdentityObservation, ProctorError> {
    let faces = backend.detect(frame)?;
    if faces.len() != 1 {
        return Ok(IdentityObservation::presence(
            frame.timestamp,
            faces.len() as u32,
        ));
    }

    let face = &faces[0];
    let spoof = backend.check_liveness(frame, face)?.clamp(0.0, 1.0);
    let embedding = if spoof > spoof_threshold {
        None
    } else {
        Some(backend.embed(frame, face)?)
    };

    Ok(IdentityObservation {
        timestamp: frame.timestamp,
        face_count: 1,
        spoof_probability: Some(spoof),
        embedding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct ScriptedBackend {
        faces: usize,
        spoof: f64,
        embeds: usize,
    }

    impl FaceBackend for ScriptedBackend {
        fn detect(&mut self, _frame: &VideoFrame) -> Result<Vec<FaceDetection>, ProctorError> {
            let face = FaceDetection {
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 0.5,
                    height: 0.5,
                },
                landmarks: Vec::new(),
                meta: None,
            };
            Ok(vec![face; self.faces])
        }

        fn embed(&mut self, _frame: &VideoFrame, _face: &FaceDetection) -> Result<Vec<f32>, ProctorError> {
            self.embeds += 1;
            Ok(vec![1.0, 0.0])
        }

        fn check_liveness(
            &mut self,
            _frame: &VideoFrame,
            _face: &FaceDetection,
        ) -> Result<f64, ProctorError> {
            Ok(self.spoof)
        }
    }

    fn frame() -> VideoFrame {
        VideoFrame {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            width: 2,
            height: 2,
            pixels: vec![0; 12],
        }
    }

    #[test]
    fn test_single_live_face_is_embedded() {
        let mut backend = ScriptedBackend {
            faces: 1,
            spoof: 0.1,
            embeds: 0,
        };
        let obs = observe_identity(&mut backend, &frame(), 0.75).unwrap();
        assert_eq!(obs.face_count, 1);
        assert_eq!(obs.embedding, Some(vec![1.0, 0.0]));
    }

    #[test]
    fn test_spoofed_face_skips_embedding() {
        let mut backend = ScriptedBackend {
            faces: 1,
            spoof: 0.9,
            embeds: 0,
        };
        let obs = observe_identity(&mut backend, &frame(), 0.75).unwrap();
        assert!(obs.embedding.is_none());
        assert_eq!(backend.embeds, 0);
    }

    #[test]
    fn test_several_faces_only_counted() {
        let mut backend = ScriptedBackend {
            faces: 3,
            spoof: 0.0,
            embeds: 0,
        };
        let obs = observe_identity(&mut backend, &frame(), 0.75).unwrap();
        assert_eq!(obs.face_count, 3);
        assert!(obs.spoof_probability.is_none());
    }

    #[test]
    fn test_audio_features_to_sample() {
        let features = AudioFeatures {
            vad_probability: 0.7,
            rms: 12.0,
            voice_band_ratio: 0.5,
            spectral_flatness: 0.3,
            speech_event: Some(SpeechEvent::Start),
        };
        let sample = features.to_sample(frame().timestamp);
        assert_eq!(sample.rms, 12.0);
    }

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame {
            timestamp: frame().timestamp,
            samples: vec![0.0; 512],
        };
        assert_eq!(frame.duration_ms(), 32);
    }
}
