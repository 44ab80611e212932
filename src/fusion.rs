//! Cross-modal fusion bridge
//!
//! The vision scorer publishes mouth motion on every processed frame; the
//! audio scorer reads the latest value for its lip-sync sub-score. The slot is
//! a single atomic word: writers overwrite, readers never wait.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel for an empty slot (a NaN bit pattern a write never produces)
const EMPTY: u64 = u64::MAX;

/// Latest mouth motion seen by the camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MouthMotion {
    /// Mouth aspect ratio of the latest frame
    pub openness: f32,
    /// Absolute change in mouth aspect ratio since the previous frame
    pub velocity: f32,
}

impl MouthMotion {
    fn pack(self) -> u64 {
        let openness = sanitize(self.openness).to_bits() as u64;
        let velocity = sanitize(self.velocity).to_bits() as u64;
        (openness << 32) | velocity
    }

    fn unpack(bits: u64) -> Self {
        Self {
            openness: f32::from_bits((bits >> 32) as u32),
            velocity: f32::from_bits(bits as u32),
        }
    }
}

fn sanitize(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Single-slot, latest-value-wins sink shared between vision and audio
#[derive(Debug)]
pub struct MouthMotionBridge {
    slot: AtomicU64,
}

impl Default for MouthMotionBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl MouthMotionBridge {
    pub fn new() -> Self {
        Self {
            slot: AtomicU64::new(EMPTY),
        }
    }

    /// Publish the latest mouth aspect ratio and its absolute frame delta
    pub fn publish(&self, mouth_aspect_ratio: f64, delta: f64) {
        let motion = MouthMotion {
            openness: mouth_aspect_ratio as f32,
            velocity: delta.abs() as f32,
        };
        self.slot.store(motion.pack(), Ordering::Release);
    }

    /// Latest published motion, or `None` if vision has not produced a frame
    pub fn latest(&self) -> Option<MouthMotion> {
        match self.slot.load(Ordering::Acquire) {
            EMPTY => None,
            bits => Some(MouthMotion::unpack(bits)),
        }
    }

    pub fn clear(&self) {
        self.slot.store(EMPTY, Ordering::Release);
    }
}
