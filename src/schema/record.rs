//! proctor.input.v1 record definition
//!
//! One NDJSON line per capture-side event:
//! - Vision and audio feature samples
//! - Speech segment boundaries from the VAD
//! - Identity observations from the verification backend
//! - Recorded media chunks for evidence
//! - Device failures

use crate::identity::IdentityObservation;
use crate::types::{AudioSample, Modality, VisionSample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current input schema version
pub const INPUT_SCHEMA: &str = "proctor.input.v1";

/// One capture-side event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputRecord {
    Vision(VisionSample),
    Audio(AudioSample),
    SpeechStart {
        timestamp: DateTime<Utc>,
    },
    SpeechEnd {
        timestamp: DateTime<Utc>,
    },
    Identity(IdentityObservation),
    Chunk {
        timestamp: DateTime<Utc>,
        #[serde(default)]
        data: Vec<u8>,
    },
    DeviceError {
        timestamp: DateTime<Utc>,
        modality: Modality,
        message: String,
    },
}

impl InputRecord {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            InputRecord::Vision(s) => s.timestamp,
            InputRecord::Audio(s) => s.timestamp,
            InputRecord::SpeechStart { timestamp }
            | InputRecord::SpeechEnd { timestamp }
            | InputRecord::Chunk { timestamp, .. }
            | InputRecord::DeviceError { timestamp, .. } => *timestamp,
            InputRecord::Identity(o) => o.timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InputRecord::Vision(_) => "vision",
            InputRecord::Audio(_) => "audio",
            InputRecord::SpeechStart { .. } => "speech_start",
            InputRecord::SpeechEnd { .. } => "speech_end",
            InputRecord::Identity(_) => "identity",
            InputRecord::Chunk { .. } => "chunk",
            InputRecord::DeviceError { .. } => "device_error",
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            InputRecord::Vision(s) => {
                unit_range("gaze_h", s.gaze_h)?;
                unit_range("gaze_v", s.gaze_v)?;
                finite("yaw", s.yaw)?;
                finite("pitch", s.pitch)?;
                non_negative("mouth_aspect_ratio", s.mouth_aspect_ratio)
            }
            InputRecord::Audio(s) => {
                unit_range("vad_probability", s.vad_probability)?;
                non_negative("rms", s.rms)?;
                unit_range("voice_band_ratio", s.voice_band_ratio)?;
                unit_range("spectral_flatness", s.spectral_flatness)
            }
            InputRecord::Identity(o) => {
                if let Some(spoof) = o.spoof_probability {
                    unit_range("spoof_probability", spoof)?;
                }
                match &o.embedding {
                    Some(e) if e.is_empty() => Err(ValidationError::EmptyEmbedding),
                    Some(e) if e.iter().any(|v| !v.is_finite()) => {
                        Err(ValidationError::NonFinite {
                            field: "embedding".to_string(),
                        })
                    }
                    _ => Ok(()),
                }
            }
            InputRecord::DeviceError { message, .. } if message.trim().is_empty() => {
                Err(ValidationError::MissingField {
                    field: "message".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

fn finite(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFinite {
            field: field.to_string(),
        })
    }
}

fn unit_range(field: &str, value: f64) -> Result<(), ValidationError> {
    finite(field, value)?;
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
        })
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ValidationError> {
    finite(field, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::Negative {
            field: field.to_string(),
            value,
        })
    }
}

/// Validation errors for input records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: String, value: f64 },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: String, value: f64 },

    #[error("{field} must be finite")]
    NonFinite { field: String },

    #[error("embedding must not be empty")]
    EmptyEmbedding,

    #[error("{field} is required")]
    MissingField { field: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_deserialize_vision_record_with_defaults() {
        let json = r#"{"type":"vision","timestamp":"2024-03-01T09:00:00Z","face_count":1,"gaze_h":0.85}"#;
        let record: InputRecord = serde_json::from_str(json).unwrap();
        match &record {
            InputRecord::Vision(s) => {
                assert_eq!(s.gaze_h, 0.85);
                assert_eq!(s.gaze_v, 0.5);
                assert_eq!(s.yaw, 0.0);
            }
            other => panic!("unexpected record {other:?}"),
        }
        assert_eq!(record.kind(), "vision");
        assert_eq!(record.timestamp(), t0());
    }

    #[test]
    fn test_serialize_speech_boundary() {
        let json = serde_json::to_string(&InputRecord::SpeechStart { timestamp: t0() }).unwrap();
        assert!(json.contains(r#""type":"speech_start""#));
    }

    #[test]
    fn test_deserialize_identity_record() {
        let json = r#"{"type":"identity","timestamp":"2024-03-01T09:00:07Z","face_count":1,"spoof_probability":0.1,"embedding":[0.1,0.2]}"#;
        let record: InputRecord = serde_json::from_str(json).unwrap();
        assert!(record.validate().is_ok());
        assert_eq!(record.kind(), "identity");
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let audio = InputRecord::Audio(AudioSample {
            timestamp: t0(),
            vad_probability: 1.2,
            rms: 3.0,
            voice_band_ratio: 0.5,
            spectral_flatness: 0.5,
        });
        assert!(matches!(
            audio.validate(),
            Err(ValidationError::OutOfRange { ref field, .. }) if field == "vad_probability"
        ));

        let quiet = InputRecord::Audio(AudioSample {
            timestamp: t0(),
            vad_probability: 0.2,
            rms: -1.0,
            voice_band_ratio: 0.5,
            spectral_flatness: 0.5,
        });
        assert!(matches!(quiet.validate(), Err(ValidationError::Negative { .. })));

        let identity = InputRecord::Identity(IdentityObservation {
            timestamp: t0(),
            face_count: 1,
            spoof_probability: None,
            embedding: Some(Vec::new()),
        });
        assert_eq!(identity.validate(), Err(ValidationError::EmptyEmbedding));
    }

    #[test]
    fn test_device_error_requires_message() {
        let record = InputRecord::DeviceError {
            timestamp: t0(),
            modality: Modality::Audio,
            message: " ".to_string(),
        };
        assert!(record.validate().is_err());
    }
}
