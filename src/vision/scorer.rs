//! Vision risk scorer
//!
//! Consumes one `VisionSample` per camera tick and produces a smoothed
//! composite risk score plus debounced flags for looking away, losing the
//! face, and extra faces in frame.

use crate::clock::elapsed_ms;
use crate::config::VisionConfig;
use crate::flags::{FlagPolicy, Signal};
use crate::fusion::MouthMotionBridge;
use crate::smoothing::{EventWindow, ExponentialSmoother};
use crate::types::{Device, FlagType, Modality, RiskSnapshot, Severity, SuspiciousEvent, VisionSample};
use crate::vision::features::{
    composite_raw, duration_raw, face_lost_penalty, flag_message, gaze_raw, horizontal_gaze_raw,
    lip_raw, pose_raw, repetition_raw, VisionSubScores,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct VisionSmoothers {
    gaze: ExponentialSmoother,
    pose: ExponentialSmoother,
    duration: ExponentialSmoother,
    repetition: ExponentialSmoother,
    lip: ExponentialSmoother,
    composite: ExponentialSmoother,
}

impl VisionSmoothers {
    fn new(alpha: f64) -> Self {
        Self {
            gaze: ExponentialSmoother::new(alpha),
            pose: ExponentialSmoother::new(alpha),
            duration: ExponentialSmoother::new(alpha),
            repetition: ExponentialSmoother::new(alpha),
            lip: ExponentialSmoother::new(alpha),
            composite: ExponentialSmoother::new(alpha),
        }
    }

    fn current(&self) -> VisionSubScores {
        VisionSubScores {
            gaze: self.gaze.get(),
            pose: self.pose.get(),
            duration: self.duration.get(),
            repetition: self.repetition.get(),
            lip: self.lip.get(),
        }
    }
}

/// Per-frame raw values kept for the snapshot breakdown
#[derive(Debug, Clone, Copy, Default)]
struct RawFrame {
    gaze: f64,
    pose: f64,
    lip: f64,
}

/// Stateful vision scorer, one per session
pub struct VisionScorer {
    config: VisionConfig,
    smoothers: VisionSmoothers,
    policy: FlagPolicy,
    bridge: Arc<MouthMotionBridge>,
    /// Horizontal gaze component of the previous frame (for the grace band)
    prev_horizontal_gaze: f64,
    last_raw: RawFrame,
    suspicious_since: Option<DateTime<Utc>>,
    repetition: EventWindow,
    last_event: Option<SuspiciousEvent>,
    mar_history: VecDeque<f64>,
    prev_mar: Option<f64>,
    face_lost_since: Option<DateTime<Utc>>,
    device_failed: bool,
    stopped: bool,
}

impl VisionScorer {
    pub fn new(config: VisionConfig, bridge: Arc<MouthMotionBridge>) -> Self {
        let policy = FlagPolicy::new()
            .with_window(FlagType::VisionRisk, config.flag_debounce_ms)
            .with_window(FlagType::FaceNotDetected, config.face_lost_debounce_ms)
            .with_window(FlagType::MultipleFaces, config.multi_face_debounce_ms)
            .with_window(FlagType::DeviceError, config.device_error_debounce_ms);
        Self {
            smoothers: VisionSmoothers::new(config.smoothing_alpha),
            repetition: EventWindow::new(config.repetition_window_ms),
            mar_history: VecDeque::with_capacity(config.lip_history_len),
            config,
            policy,
            bridge,
            prev_horizontal_gaze: 0.0,
            last_raw: RawFrame::default(),
            suspicious_since: None,
            last_event: None,
            prev_mar: None,
            face_lost_since: None,
            device_failed: false,
            stopped: false,
        }
    }

    /// Score one frame. Returns the snapshot followed by any flags.
    pub fn process(&mut self, sample: &VisionSample) -> Vec<Signal> {
        if self.stopped {
            return Vec::new();
        }
        if self.device_failed {
            tracing::debug!("camera recovered");
            self.device_failed = false;
        }
        let now = sample.timestamp;
        let mut signals = Vec::new();

        let penalty = if sample.face_count == 0 {
            self.bridge.clear();
            self.face_lost(now, &mut signals)
        } else {
            self.face_lost_since = None;
            if sample.face_count > 1 {
                if let Some(flag) = self.policy.try_emit(
                    FlagType::MultipleFaces,
                    Severity::High,
                    format!("Multiple faces detected ({})", sample.face_count),
                    now,
                ) {
                    signals.push(Signal::Flag(flag));
                }
            }
            self.score_face(sample);
            0.0
        };

        let scores = self.smoothers.current();
        let composite = self
            .smoothers
            .composite
            .update(composite_raw(&scores, &self.config.weights))
            .clamp(0.0, 1.0);

        if sample.face_count > 0 && composite > self.config.flag_threshold {
            let message = flag_message(&scores, &self.config.weights);
            if let Some(flag) = self
                .policy
                .try_emit(FlagType::VisionRisk, Severity::Medium, message, now)
            {
                signals.push(Signal::Flag(flag));
            }
        }

        let snapshot = self.snapshot(now, composite, penalty, &scores);
        signals.insert(0, Signal::Snapshot(snapshot));
        signals
    }

    fn score_face(&mut self, sample: &VisionSample) {
        let now = sample.timestamp;
        let onset_ms = self.config.duration_onset_ms;
        let full_ms = self.config.duration_full_ms;

        let horizontal =
            horizontal_gaze_raw(sample.gaze_h, self.prev_horizontal_gaze, &self.config);
        self.prev_horizontal_gaze = horizontal;
        let gaze = gaze_raw(horizontal, sample.gaze_v, &self.config);
        let pose = pose_raw(sample.yaw, sample.pitch, &self.config);

        let suspicious = gaze > 0.5 || pose > 0.5;
        let duration = match (suspicious, self.suspicious_since) {
            (true, None) => {
                self.suspicious_since = Some(now);
                0.0
            }
            (true, Some(since)) => duration_raw(elapsed_ms(since, now), onset_ms, full_ms),
            (false, Some(since)) => {
                self.suspicious_since = None;
                self.close_suspicious_interval(since, now);
                0.0
            }
            (false, None) => 0.0,
        };

        let repetition = repetition_raw(
            self.repetition.count(now),
            self.config.repetition_saturation,
        );

        let mar = sample.mouth_aspect_ratio;
        let delta = self.prev_mar.map(|prev| mar - prev).unwrap_or(0.0);
        self.prev_mar = Some(mar);
        self.mar_history.push_back(mar);
        while self.mar_history.len() > self.config.lip_history_len {
            self.mar_history.pop_front();
        }
        let lip = lip_raw(&self.mar_history, mar, delta, &self.config);
        self.bridge.publish(mar, delta);

        self.smoothers.gaze.update(gaze);
        self.smoothers.pose.update(pose);
        // Keeps decaying while not suspicious instead of snapping to zero
        self.smoothers.duration.update(duration);
        self.smoothers.repetition.update(repetition);
        self.smoothers.lip.update(lip);

        self.last_raw = RawFrame { gaze, pose, lip };
    }

    fn close_suspicious_interval(&mut self, since: DateTime<Utc>, now: DateTime<Utc>) {
        let event = SuspiciousEvent::new(since, now);
        if event.duration_ms <= self.config.event_min_duration_ms {
            return;
        }
        let cooled_down = match self.repetition.last() {
            Some(last) => elapsed_ms(last, now) >= self.config.event_cooldown_ms,
            None => true,
        };
        if cooled_down {
            tracing::debug!(duration_ms = event.duration_ms, "suspicious interval recorded");
            self.repetition.record(now);
            self.last_event = Some(event);
        }
    }

    fn face_lost(&mut self, now: DateTime<Utc>, signals: &mut Vec<Signal>) -> f64 {
        let since = *self.face_lost_since.get_or_insert(now);
        let lost_ms = elapsed_ms(since, now);
        let penalty = face_lost_penalty(lost_ms, &self.config);

        if penalty > self.config.face_lost_flag_penalty && lost_ms > self.config.face_lost_flag_after_ms {
            if let Some(flag) = self.policy.try_emit(
                FlagType::FaceNotDetected,
                Severity::Medium,
                "Face not detected",
                now,
            ) {
                signals.push(Signal::Flag(flag));
            }
        }
        penalty
    }

    fn snapshot(
        &mut self,
        now: DateTime<Utc>,
        composite: f64,
        penalty: f64,
        scores: &VisionSubScores,
    ) -> RiskSnapshot {
        let mut breakdown = BTreeMap::new();
        breakdown.insert("gaze".to_string(), scores.gaze);
        breakdown.insert("pose".to_string(), scores.pose);
        breakdown.insert("duration".to_string(), scores.duration);
        breakdown.insert("repetition".to_string(), scores.repetition);
        breakdown.insert("lip".to_string(), scores.lip);
        breakdown.insert("face_lost_penalty".to_string(), penalty);
        breakdown.insert("gaze_raw".to_string(), self.last_raw.gaze);
        breakdown.insert("pose_raw".to_string(), self.last_raw.pose);
        breakdown.insert("lip_raw".to_string(), self.last_raw.lip);
        breakdown.insert(
            "repetition_count".to_string(),
            self.repetition.count(now) as f64,
        );
        if let Some(since) = self.suspicious_since {
            breakdown.insert("suspicious_ms".to_string(), elapsed_ms(since, now) as f64);
        }

        RiskSnapshot {
            modality: Modality::Vision,
            composite_score: (composite + penalty).clamp(0.0, 1.0),
            breakdown,
            is_calibrating: false,
            timestamp: now,
        }
    }

    /// Camera stopped delivering frames.
    ///
    /// Emits a device-error signal and a debounced flag, and reports zero
    /// confidence until the next frame arrives.
    pub fn report_device_error(&mut self, now: DateTime<Utc>, message: &str) -> Vec<Signal> {
        if self.stopped {
            return Vec::new();
        }
        tracing::warn!(device = "camera", %message, "vision adapter failure");
        self.device_failed = true;
        self.smoothers.composite.reset();
        self.bridge.clear();

        let mut signals = vec![Signal::DeviceError {
            modality: Modality::Vision,
            device: Device::Camera,
            message: message.to_string(),
            timestamp: now,
        }];
        if let Some(flag) = self.policy.try_emit(
            FlagType::DeviceError,
            Severity::Medium,
            format!("Camera unavailable: {message}"),
            now,
        ) {
            signals.push(Signal::Flag(flag));
        }
        signals.push(Signal::Snapshot(RiskSnapshot {
            modality: Modality::Vision,
            composite_score: 0.0,
            breakdown: BTreeMap::new(),
            is_calibrating: false,
            timestamp: now,
        }));
        signals
    }

    /// Current smoothed composite (without face-lost penalty)
    pub fn composite(&self) -> f64 {
        if self.device_failed {
            return 0.0;
        }
        self.smoothers.composite.get()
    }

    /// Most recent suspicious interval that was counted as a repetition
    pub fn last_event(&self) -> Option<&SuspiciousEvent> {
        self.last_event.as_ref()
    }

    pub fn is_suspicious(&self) -> bool {
        self.suspicious_since.is_some()
    }

    /// Halt scoring; later frames are discarded
    pub fn stop(&mut self) {
        self.stopped = true;
        self.bridge.clear();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}
