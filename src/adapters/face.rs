//! Face detection results and landmark geometry
//!
//! Maps detector output to the per-frame `VisionSample` the vision scorer
//! consumes. Detectors that report head pose and blendshapes use them
//! directly; otherwise yaw and pitch are estimated from five landmarks.

use crate::types::VisionSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum number of semantic landmarks a detection must carry
pub const MIN_LANDMARKS: usize = 5;

/// Landmark order: eyes, nose tip, mouth corners
pub const RIGHT_EYE: usize = 0;
pub const LEFT_EYE: usize = 1;
pub const NOSE_TIP: usize = 2;
pub const MOUTH_RIGHT: usize = 3;
pub const MOUTH_LEFT: usize = 4;

/// Nose-to-eye share of the eye-to-mouth distance for a level head
const NEUTRAL_NOSE_DROP: f64 = 0.5;

/// Normalized image coordinates (0-1)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    fn distance(self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Pose and blendshape-derived values some detectors report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceMeta {
    pub yaw: f64,
    pub pitch: f64,
    pub gaze_h: f64,
    pub gaze_v: f64,
    pub mouth_aspect_ratio: f64,
}

/// One detected face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub landmarks: Vec<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<FaceMeta>,
}

impl FaceDetection {
    pub fn has_landmarks(&self) -> bool {
        self.landmarks.len() >= MIN_LANDMARKS
    }
}

/// Build the scorer's sample from all faces detected in one frame.
///
/// The largest face is treated as the test taker.
pub fn vision_sample(faces: &[FaceDetection], timestamp: DateTime<Utc>) -> VisionSample {
    let primary = faces
        .iter()
        .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()));
    let Some(face) = primary else {
        return VisionSample::no_face(timestamp);
    };

    let mut sample = VisionSample::no_face(timestamp);
    sample.face_count = faces.len() as u32;

    match (&face.meta, face.has_landmarks()) {
        (Some(meta), _) => {
            sample.yaw = meta.yaw;
            sample.pitch = meta.pitch;
            sample.gaze_h = meta.gaze_h.clamp(0.0, 1.0);
            sample.gaze_v = meta.gaze_v.clamp(0.0, 1.0);
            sample.mouth_aspect_ratio = meta.mouth_aspect_ratio.max(0.0);
        }
        (None, true) => {
            let (yaw, pitch) = head_pose(&face.landmarks);
            sample.yaw = yaw;
            sample.pitch = pitch;
        }
        (None, false) => {}
    }
    sample
}

/// Rough (yaw, pitch) from five landmarks.
///
/// Yaw is the nose offset from the eye midpoint in inter-ocular units.
/// Pitch is how far the nose sits toward the mouth compared to a level head,
/// positive when looking down.
pub fn head_pose(landmarks: &[Point]) -> (f64, f64) {
    if landmarks.len() < MIN_LANDMARKS {
        return (0.0, 0.0);
    }
    let eyes = landmarks[RIGHT_EYE].midpoint(landmarks[LEFT_EYE]);
    let mouth = landmarks[MOUTH_RIGHT].midpoint(landmarks[MOUTH_LEFT]);
    let nose = landmarks[NOSE_TIP];

    let eye_distance = landmarks[RIGHT_EYE].distance(landmarks[LEFT_EYE]);
    let yaw = if eye_distance > f64::EPSILON {
        (nose.x - eyes.x) / eye_distance
    } else {
        0.0
    };

    let face_height = mouth.y - eyes.y;
    let pitch = if face_height.abs() > f64::EPSILON {
        (nose.y - eyes.y) / face_height - NEUTRAL_NOSE_DROP
    } else {
        0.0
    };
    (yaw, pitch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn face(nose: Point, size: f64) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox {
                x: 0.3,
                y: 0.3,
                width: size,
                height: size,
            },
            landmarks: vec![
                Point::new(0.40, 0.40),
                Point::new(0.60, 0.40),
                nose,
                Point::new(0.45, 0.70),
                Point::new(0.55, 0.70),
            ],
            meta: None,
        }
    }

    #[test]
    fn test_frontal_face_is_level() {
        let (yaw, pitch) = head_pose(&face(Point::new(0.5, 0.55), 0.4).landmarks);
        assert!(yaw.abs() < 1e-9);
        assert!(pitch.abs() < 1e-9);
    }

    #[test]
    fn test_turned_and_lowered_head() {
        let (yaw, _) = head_pose(&face(Point::new(0.56, 0.55), 0.4).landmarks);
        assert!((yaw - 0.3).abs() < 1e-9);

        let (_, pitch) = head_pose(&face(Point::new(0.5, 0.64), 0.4).landmarks);
        assert!((pitch - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_sample_without_faces() {
        let sample = vision_sample(&[], t0());
        assert_eq!(sample.face_count, 0);
    }

    #[test]
    fn test_largest_face_is_primary_and_meta_wins() {
        let small = face(Point::new(0.56, 0.55), 0.1);
        let mut large = face(Point::new(0.5, 0.55), 0.5);
        large.meta = Some(FaceMeta {
            yaw: 0.05,
            pitch: 0.0,
            gaze_h: 0.9,
            gaze_v: 0.3,
            mouth_aspect_ratio: 0.2,
        });

        let sample = vision_sample(&[small, large], t0());
        assert_eq!(sample.face_count, 2);
        assert_eq!(sample.gaze_h, 0.9);
        assert_eq!(sample.yaw, 0.05);
    }

    #[test]
    fn test_landmark_only_face_has_neutral_gaze() {
        let sample = vision_sample(&[face(Point::new(0.56, 0.55), 0.4)], t0());
        assert_eq!(sample.gaze_h, 0.5);
        assert_eq!(sample.mouth_aspect_ratio, 0.0);
        assert!((sample.yaw - 0.3).abs() < 1e-9);
    }
}
