//! Audio risk scorer
//!
//! Consumes VAD frames plus speech segment boundaries and produces a smoothed
//! composite risk score with debounced flags. The first few seconds after
//! `start` calibrate the ambient baseline and score nothing.

use crate::audio::features::{
    adaptive_gate, flag_message, lip_sync_raw, near_field_raw, passes_gate, weighted_composite,
    AudioSubScores,
};
use crate::baseline::AmbientCalibrator;
use crate::clock::elapsed_ms;
use crate::config::AudioConfig;
use crate::flags::{FlagPolicy, Signal};
use crate::fusion::MouthMotionBridge;
use crate::smoothing::{EventWindow, ExponentialSmoother};
use crate::types::{AudioSample, Device, FlagType, Modality, RiskSnapshot, Severity};
use crate::vision::features::{duration_raw, repetition_raw};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct AudioSmoothers {
    speech: ExponentialSmoother,
    near_field: ExponentialSmoother,
    duration: ExponentialSmoother,
    repetition: ExponentialSmoother,
    lip_sync: ExponentialSmoother,
    composite: ExponentialSmoother,
}

impl AudioSmoothers {
    fn new(alpha: f64) -> Self {
        Self {
            speech: ExponentialSmoother::new(alpha),
            near_field: ExponentialSmoother::new(alpha),
            duration: ExponentialSmoother::new(alpha),
            repetition: ExponentialSmoother::new(alpha),
            lip_sync: ExponentialSmoother::new(alpha),
            composite: ExponentialSmoother::new(alpha),
        }
    }

    fn current(&self) -> AudioSubScores {
        AudioSubScores {
            speech: self.speech.get(),
            near_field: self.near_field.get(),
            duration: self.duration.get(),
            repetition: self.repetition.get(),
            lip_sync: self.lip_sync.get(),
        }
    }

    fn reset(&mut self) {
        self.speech.reset();
        self.near_field.reset();
        self.duration.reset();
        self.repetition.reset();
        self.lip_sync.reset();
        self.composite.reset();
    }
}

/// Stateful audio scorer, one per session
pub struct AudioScorer {
    config: AudioConfig,
    calibrator: AmbientCalibrator,
    smoothers: AudioSmoothers,
    policy: FlagPolicy,
    bridge: Arc<MouthMotionBridge>,
    segment_start: Option<DateTime<Utc>>,
    segments: EventWindow,
    gate: f64,
    device_failed: bool,
    stopped: bool,
}

impl AudioScorer {
    pub fn new(config: AudioConfig, bridge: Arc<MouthMotionBridge>) -> Self {
        let policy = FlagPolicy::new()
            .with_window(FlagType::AudioRisk, config.flag_debounce_ms)
            .with_window(FlagType::DeviceError, config.device_error_debounce_ms);
        Self {
            calibrator: AmbientCalibrator::new(config.calibration_ms),
            smoothers: AudioSmoothers::new(config.smoothing_alpha),
            segments: EventWindow::new(config.repetition_window_ms),
            gate: config.static_gate,
            config,
            policy,
            bridge,
            segment_start: None,
            device_failed: false,
            stopped: false,
        }
    }

    /// Begin scoring at `now`; the calibration window starts here
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.calibrator.start(now);
        self.smoothers.reset();
        self.policy.reset();
        self.segments.clear();
        self.segment_start = None;
        self.gate = self.config.static_gate;
        self.stopped = false;
        tracing::debug!(duration_ms = self.config.calibration_ms, "audio calibration started");
    }

    /// Score one VAD frame. Returns the snapshot followed by any flags.
    pub fn process(&mut self, sample: &AudioSample) -> Vec<Signal> {
        if self.stopped {
            return Vec::new();
        }
        self.device_failed = false;
        let now = sample.timestamp;

        // Stage 1: ambient calibration
        if !self.calibrator.is_complete() {
            if !self.calibrator.is_started() {
                self.start(now);
            }
            if !self.calibrator.add_sample(now, sample) {
                return vec![Signal::Snapshot(self.calibrating_snapshot(now))];
            }
            self.gate = adaptive_gate(Some(self.calibrator.baseline()), &self.config);
            tracing::debug!(gate = self.gate, "audio speech gate set");
        }

        // Stage 2: speech gate. Quiet frames only decay the composite.
        if !passes_gate(sample.vad_probability, self.gate, &self.config) {
            let composite = self.smoothers.composite.update(0.0).clamp(0.0, 1.0);
            let scores = self.smoothers.current();
            return vec![Signal::Snapshot(self.snapshot(now, composite, &scores, None))];
        }

        // Stage 3: raw sub-scores
        let baseline = self.calibrator.baseline();
        let near_field = near_field_raw(sample, baseline);
        let duration = match self.segment_start {
            Some(start) => duration_raw(
                elapsed_ms(start, now),
                self.config.duration_onset_ms,
                self.config.duration_full_ms,
            ),
            None => 0.0,
        };
        let repetition = repetition_raw(
            self.segments.count(now),
            self.config.repetition_saturation,
        );
        let lip_sync = lip_sync_raw(self.bridge.latest(), sample.vad_probability, &self.config);

        // Stage 4: smoothing and composite
        self.smoothers.speech.update(sample.vad_probability.clamp(0.0, 1.0));
        self.smoothers.near_field.update(near_field);
        self.smoothers.duration.update(duration);
        self.smoothers.repetition.update(repetition);
        self.smoothers.lip_sync.update(lip_sync);

        let scores = self.smoothers.current();
        let composite = self
            .smoothers
            .composite
            .update(weighted_composite(&scores, &self.config.weights))
            .clamp(0.0, 1.0);

        // Stage 5: flag
        let mut signals = vec![Signal::Snapshot(self.snapshot(
            now,
            composite,
            &scores,
            Some(near_field),
        ))];
        if composite > self.config.flag_threshold {
            let message = flag_message(&scores, &self.config.weights);
            if let Some(flag) = self
                .policy
                .try_emit(FlagType::AudioRisk, Severity::Medium, message, now)
            {
                signals.push(Signal::Flag(flag));
            }
        }
        signals
    }

    /// Start of a speech segment reported by the VAD
    pub fn speech_started(&mut self, at: DateTime<Utc>) {
        if self.stopped {
            return;
        }
        if self.segment_start.is_none() {
            self.segment_start = Some(at);
        }
    }

    /// End of a speech segment. Long segments count toward repetition.
    pub fn speech_ended(&mut self, at: DateTime<Utc>) {
        if self.stopped {
            return;
        }
        let Some(start) = self.segment_start.take() else {
            return;
        };
        let duration_ms = elapsed_ms(start, at);
        if duration_ms > self.config.segment_min_duration_ms {
            tracing::debug!(duration_ms, "speech segment recorded");
            self.segments.record(at);
        }
        self.smoothers.duration.reset();
    }

    /// Microphone stopped delivering frames
    pub fn report_device_error(&mut self, now: DateTime<Utc>, message: &str) -> Vec<Signal> {
        if self.stopped {
            return Vec::new();
        }
        tracing::warn!(device = "microphone", %message, "audio adapter failure");
        self.device_failed = true;
        self.smoothers.composite.reset();
        self.segment_start = None;

        let mut signals = vec![Signal::DeviceError {
            modality: Modality::Audio,
            device: Device::Microphone,
            message: message.to_string(),
            timestamp: now,
        }];
        if let Some(flag) = self.policy.try_emit(
            FlagType::DeviceError,
            Severity::Medium,
            format!("Microphone unavailable: {message}"),
            now,
        ) {
            signals.push(Signal::Flag(flag));
        }
        signals.push(Signal::Snapshot(RiskSnapshot {
            modality: Modality::Audio,
            composite_score: 0.0,
            breakdown: BTreeMap::new(),
            is_calibrating: !self.calibrator.is_complete(),
            timestamp: now,
        }));
        signals
    }

    fn calibrating_snapshot(&self, now: DateTime<Utc>) -> RiskSnapshot {
        let mut breakdown = BTreeMap::new();
        breakdown.insert(
            "calibration_progress".to_string(),
            self.calibrator.progress(now),
        );
        RiskSnapshot {
            modality: Modality::Audio,
            composite_score: 0.0,
            breakdown,
            is_calibrating: true,
            timestamp: now,
        }
    }

    fn snapshot(
        &mut self,
        now: DateTime<Utc>,
        composite: f64,
        scores: &AudioSubScores,
        near_field_raw: Option<f64>,
    ) -> RiskSnapshot {
        let mut breakdown = BTreeMap::new();
        breakdown.insert("speech".to_string(), scores.speech);
        breakdown.insert("near_field".to_string(), scores.near_field);
        breakdown.insert("duration".to_string(), scores.duration);
        breakdown.insert("repetition".to_string(), scores.repetition);
        breakdown.insert("lip_sync".to_string(), scores.lip_sync);
        breakdown.insert("gate".to_string(), self.gate);
        breakdown.insert(
            "segment_count".to_string(),
            self.segments.count(now) as f64,
        );
        if let Some(raw) = near_field_raw {
            breakdown.insert("near_field_raw".to_string(), raw);
        }
        if let Some(start) = self.segment_start {
            breakdown.insert("segment_ms".to_string(), elapsed_ms(start, now) as f64);
        }

        RiskSnapshot {
            modality: Modality::Audio,
            composite_score: composite,
            breakdown,
            is_calibrating: false,
            timestamp: now,
        }
    }

    /// Current smoothed composite, zero while calibrating or after a device failure
    pub fn composite(&self) -> f64 {
        if self.device_failed || !self.calibrator.is_complete() {
            return 0.0;
        }
        self.smoothers.composite.get()
    }

    pub fn is_calibrating(&self) -> bool {
        !self.calibrator.is_complete()
    }

    /// Speech gate in effect (static until calibration completes)
    pub fn gate(&self) -> f64 {
        self.gate
    }

    pub fn calibrator(&self) -> &AmbientCalibrator {
        &self.calibrator
    }

    pub fn in_segment(&self) -> bool {
        self.segment_start.is_some()
    }

    pub fn stop(&mut self) {
        self.stopped = true;
        self.segment_start = None;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}
