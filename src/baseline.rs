//! Ambient calibration
//!
//! This module captures per-signal ambient baselines over a fixed warm-up
//! window. Baselines let the audio scorer interpret loudness and voice-band
//! energy relative to the room the subject is sitting in.

use crate::clock::elapsed_ms;
use crate::types::AudioSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default warm-up window in milliseconds
pub const DEFAULT_CALIBRATION_MS: i64 = 5_000;

/// Named signal values contributed by one sample
pub trait CalibrationFeatures {
    fn calibration_values(&self) -> Vec<(&'static str, f64)>;
}

impl CalibrationFeatures for AudioSample {
    fn calibration_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("rms", self.rms),
            ("voice_band_ratio", self.voice_band_ratio),
            ("spectral_flatness", self.spectral_flatness),
        ]
    }
}

/// Per-signal means captured over the warm-up window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBaseline {
    /// Arithmetic mean per signal name
    pub means: BTreeMap<String, f64>,
    /// Number of samples the means were computed from
    pub sample_count: u32,
    /// Whether the warm-up window has elapsed
    pub complete: bool,
}

impl CalibrationBaseline {
    /// Mean for a signal, 0 when the signal was never observed
    pub fn get(&self, name: &str) -> f64 {
        self.means.get(name).copied().unwrap_or(0.0)
    }
}

/// Collects samples for a fixed duration and finalizes them into a baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbientCalibrator {
    /// Rolling values per signal, in arrival order
    values: BTreeMap<String, Vec<f64>>,
    /// Warm-up duration in milliseconds
    duration_ms: i64,
    /// When calibration started
    started_at: Option<DateTime<Utc>>,
    baseline: CalibrationBaseline,
}

impl Default for AmbientCalibrator {
    fn default() -> Self {
        Self::new(DEFAULT_CALIBRATION_MS)
    }
}

impl AmbientCalibrator {
    pub fn new(duration_ms: i64) -> Self {
        Self {
            values: BTreeMap::new(),
            duration_ms: duration_ms.max(0),
            started_at: None,
            baseline: CalibrationBaseline::default(),
        }
    }

    /// Begin a fresh warm-up window at `now`
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.values.clear();
        self.baseline = CalibrationBaseline::default();
        self.started_at = Some(now);
    }

    /// Add a sample observed at `now`.
    ///
    /// Samples are collected until the warm-up window elapses; the first call
    /// at or past the window finalizes the baseline. Returns `true` on the
    /// call that finalized.
    pub fn add_sample<F: CalibrationFeatures>(&mut self, now: DateTime<Utc>, features: &F) -> bool {
        if self.baseline.complete {
            return false;
        }
        let started_at = match self.started_at {
            Some(t) => t,
            None => {
                self.start(now);
                now
            }
        };

        if elapsed_ms(started_at, now) >= self.duration_ms {
            self.finalize();
            return true;
        }

        for (name, value) in features.calibration_values() {
            if value.is_finite() {
                self.values.entry(name.to_string()).or_default().push(value);
            }
        }
        false
    }

    /// Compute the per-signal mean and mark the baseline complete.
    ///
    /// With no samples every mean is zero.
    pub fn finalize(&mut self) {
        let means = self
            .values
            .iter()
            .map(|(name, values)| (name.clone(), Self::mean(values).unwrap_or(0.0)))
            .collect();
        let sample_count = self.values.values().map(Vec::len).max().unwrap_or(0) as u32;

        self.baseline = CalibrationBaseline {
            means,
            sample_count,
            complete: true,
        };
        tracing::debug!(
            samples = sample_count,
            "ambient calibration finalized"
        );
    }

    pub fn is_complete(&self) -> bool {
        self.baseline.complete
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Fraction of the warm-up window elapsed at `now` (0-1)
    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        if self.baseline.complete {
            return 1.0;
        }
        match self.started_at {
            None => 0.0,
            Some(_) if self.duration_ms == 0 => 1.0,
            Some(start) => (elapsed_ms(start, now) as f64 / self.duration_ms as f64).clamp(0.0, 1.0),
        }
    }

    pub fn baseline(&self) -> &CalibrationBaseline {
        &self.baseline
    }

    /// Forget all samples and the start time
    pub fn reset(&mut self) {
        self.values.clear();
        self.started_at = None;
        self.baseline = CalibrationBaseline::default();
    }

    fn mean(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().sum();
        Some(sum / values.len() as f64)
    }

    /// Load calibrator state from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize calibrator state to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
