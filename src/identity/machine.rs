//! Identity verification state machine
//!
//! `tick` is a pure transition over one observation: presence, then liveness,
//! then recognition. Escalation uses consecutive-tick counters, and at most one
//! identity flag is outstanding at a time; it is resolved by the next
//! successful verification.

use crate::config::IdentityConfig;
use crate::error::ProctorError;
use crate::flags::{FlagPolicy, Signal};
use crate::identity::embedding::{centroid, cosine_similarity};
use crate::types::{Device, Flag, FlagType, IdentitySample, Modality, RiskSnapshot, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Verification state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityState {
    /// No tick processed yet
    Initializing,
    /// Last tick verified the subject
    Active,
    /// Last tick found a problem
    Warning,
    /// Embedding format incompatible with the reference; verification disabled
    Legacy,
    /// The detection backend failed on the last tick
    Error,
}

impl IdentityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityState::Initializing => "initializing",
            IdentityState::Active => "active",
            IdentityState::Warning => "warning",
            IdentityState::Legacy => "legacy",
            IdentityState::Error => "error",
        }
    }
}

/// What the detection backend saw on one verification tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityObservation {
    pub timestamp: DateTime<Utc>,
    pub face_count: u32,
    /// Liveness result as a spoof probability, when liveness ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spoof_probability: Option<f64>,
    /// Embedding of the single observed face, when recognition ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl IdentityObservation {
    /// Observation for a tick with a single face that was fully analyzed
    pub fn from_sample(timestamp: DateTime<Utc>, sample: &IdentitySample) -> Self {
        Self {
            timestamp,
            face_count: 1,
            spoof_probability: Some(sample.spoof_probability()),
            embedding: Some(sample.embedding.clone()),
        }
    }

    /// Observation for a tick with no analysis beyond a face count
    pub fn presence(timestamp: DateTime<Utc>, face_count: u32) -> Self {
        Self {
            timestamp,
            face_count,
            spoof_probability: None,
            embedding: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    missing: u32,
    multiple: u32,
    mismatch: u32,
}

/// Per-session identity verifier
pub struct IdentityVerifier {
    config: IdentityConfig,
    state: IdentityState,
    reference: Option<Vec<f32>>,
    counters: Counters,
    outstanding: Option<Uuid>,
    device_policy: FlagPolicy,
    last_similarity: Option<f64>,
    stopped: bool,
}

impl IdentityVerifier {
    pub fn new(config: IdentityConfig) -> Self {
        let device_policy =
            FlagPolicy::new().with_window(FlagType::DeviceError, config.device_error_debounce_ms);
        Self {
            config,
            state: IdentityState::Initializing,
            reference: None,
            counters: Counters::default(),
            outstanding: None,
            device_policy,
            last_similarity: None,
            stopped: false,
        }
    }

    /// Use `reference` as the enrolled centroid
    pub fn with_reference(mut self, reference: Vec<f32>) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Build the reference centroid from enrollment embeddings.
    ///
    /// Embeddings of mixed length cannot form a centroid; verification is
    /// disabled for the rest of the session.
    pub fn enroll(&mut self, embeddings: &[Vec<f32>]) -> Result<(), ProctorError> {
        match centroid(embeddings) {
            Ok(reference) => {
                tracing::debug!(
                    dim = reference.len(),
                    samples = embeddings.len(),
                    "identity reference enrolled"
                );
                self.reference = Some(reference);
                Ok(())
            }
            Err(err @ ProctorError::IncompatibleEmbedding { .. }) => {
                self.enter_legacy(&err);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Process one verification tick
    pub fn tick(&mut self, observation: &IdentityObservation) -> Vec<Signal> {
        if self.stopped || self.state == IdentityState::Legacy {
            return Vec::new();
        }
        let now = observation.timestamp;
        let mut flags = Vec::new();
        let mut risk = 0.0;

        if observation.face_count == 0 {
            // Stage 1: presence
            self.counters.missing += 1;
            self.counters.multiple = 0;
            self.counters.mismatch = 0;
            self.set_state(IdentityState::Warning);
            risk = 1.0;
            if self.counters.missing >= self.config.missing_ticks {
                flags.extend(self.raise(
                    FlagType::IdentityMissing,
                    Severity::Medium,
                    "Test taker not visible".to_string(),
                    now,
                ));
            }
        } else if observation.face_count > 1 {
            self.counters.multiple += 1;
            self.counters.missing = 0;
            self.set_state(IdentityState::Warning);
            risk = 1.0;
            if self.counters.multiple >= self.config.multiple_ticks {
                flags.extend(self.raise(
                    FlagType::IdentityMultipleFaces,
                    Severity::High,
                    format!("Multiple people detected ({})", observation.face_count),
                    now,
                ));
            }
        } else {
            self.counters.missing = 0;
            self.counters.multiple = 0;
            let spoof = observation.spoof_probability.unwrap_or(0.0);

            // Stage 2: liveness
            if spoof > self.config.spoof_threshold {
                self.set_state(IdentityState::Warning);
                risk = spoof;
                flags.extend(self.raise(
                    FlagType::SpoofDetected,
                    Severity::High,
                    "Possible spoof detected".to_string(),
                    now,
                ));
            } else {
                // Stage 3: recognition
                match self.recognize(observation, spoof, now) {
                    Recognition::Verified(similarity) => {
                        risk = similarity.map(|s| (1.0 - s).clamp(0.0, 1.0)).unwrap_or(0.0);
                        self.counters.mismatch = 0;
                        self.set_state(IdentityState::Active);
                        if let Some(flag_id) = self.outstanding.take() {
                            tracing::debug!(%flag_id, "identity flag resolved");
                            flags.push(Signal::Resolved {
                                flag_id,
                                timestamp: now,
                            });
                        }
                    }
                    Recognition::Mismatch(similarity, raised) => {
                        risk = (1.0 - similarity).clamp(0.0, 1.0);
                        flags.extend(raised);
                    }
                    Recognition::Skipped => {}
                    Recognition::Incompatible => return Vec::new(),
                }
            }
        }

        let mut signals = vec![Signal::Snapshot(self.snapshot(now, risk, observation))];
        signals.extend(flags);
        signals
    }

    fn recognize(
        &mut self,
        observation: &IdentityObservation,
        spoof: f64,
        now: DateTime<Utc>,
    ) -> Recognition {
        let Some(reference) = self.reference.as_ref() else {
            // Presence-only verification
            self.last_similarity = None;
            return Recognition::Verified(None);
        };
        let Some(embedding) = observation.embedding.as_ref() else {
            return Recognition::Skipped;
        };

        let similarity = match cosine_similarity(reference, embedding) {
            Ok(s) => s,
            Err(err) => {
                self.enter_legacy(&err);
                return Recognition::Incompatible;
            }
        };
        self.last_similarity = Some(similarity);

        if similarity >= self.config.match_threshold {
            return Recognition::Verified(Some(similarity));
        }

        self.counters.mismatch += 1;
        self.set_state(IdentityState::Warning);
        let raised = if spoof > self.config.impersonation_spoof
            && similarity < self.config.impersonation_similarity
        {
            self.raise(
                FlagType::Impersonation,
                Severity::High,
                format!("Possible impersonation (similarity {similarity:.2})"),
                now,
            )
        } else if self.counters.mismatch >= self.config.mismatch_ticks {
            self.raise(
                FlagType::IdentityMismatch,
                Severity::High,
                format!("Identity mismatch (similarity {similarity:.2})"),
                now,
            )
        } else {
            None
        };
        Recognition::Mismatch(similarity, raised)
    }

    /// Emit a flag unless one is already outstanding
    fn raise(
        &mut self,
        flag_type: FlagType,
        severity: Severity,
        message: String,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        if let Some(pending) = self.outstanding {
            tracing::trace!(flag = flag_type.as_str(), %pending, "identity flag outstanding");
            return None;
        }
        let flag = Flag::new(flag_type, severity, message, now);
        tracing::info!(
            flag = flag_type.as_str(),
            severity = ?severity,
            message = %flag.message,
            "flag emitted"
        );
        self.outstanding = Some(flag.id);
        Some(Signal::Flag(flag))
    }

    fn set_state(&mut self, next: IdentityState) {
        if self.state != next {
            tracing::debug!(from = self.state.as_str(), to = next.as_str(), "identity state");
            self.state = next;
        }
    }

    fn enter_legacy(&mut self, err: &ProctorError) {
        tracing::warn!(error = %err, "identity verification disabled");
        self.set_state(IdentityState::Legacy);
    }

    fn snapshot(
        &self,
        now: DateTime<Utc>,
        risk: f64,
        observation: &IdentityObservation,
    ) -> RiskSnapshot {
        let mut breakdown = BTreeMap::new();
        breakdown.insert("face_count".to_string(), observation.face_count as f64);
        breakdown.insert("missing_ticks".to_string(), self.counters.missing as f64);
        breakdown.insert("multiple_ticks".to_string(), self.counters.multiple as f64);
        breakdown.insert("mismatch_ticks".to_string(), self.counters.mismatch as f64);
        if let Some(spoof) = observation.spoof_probability {
            breakdown.insert("spoof_probability".to_string(), spoof);
        }
        if let Some(similarity) = self.last_similarity {
            breakdown.insert("similarity".to_string(), similarity);
        }

        RiskSnapshot {
            modality: Modality::Identity,
            composite_score: risk,
            breakdown,
            is_calibrating: false,
            timestamp: now,
        }
    }

    /// The detection backend failed for this tick
    pub fn report_device_error(&mut self, now: DateTime<Utc>, message: &str) -> Vec<Signal> {
        if self.stopped || self.state == IdentityState::Legacy {
            return Vec::new();
        }
        tracing::warn!(device = "camera", %message, "identity backend failure");
        self.set_state(IdentityState::Error);

        let mut signals = vec![Signal::DeviceError {
            modality: Modality::Identity,
            device: Device::Camera,
            message: message.to_string(),
            timestamp: now,
        }];
        if let Some(flag) = self.device_policy.try_emit(
            FlagType::DeviceError,
            Severity::Medium,
            format!("Identity camera unavailable: {message}"),
            now,
        ) {
            signals.push(Signal::Flag(flag));
        }
        signals
    }

    pub fn state(&self) -> IdentityState {
        self.state
    }

    pub fn mismatch_count(&self) -> u32 {
        self.counters.mismatch
    }

    pub fn missing_count(&self) -> u32 {
        self.counters.missing
    }

    pub fn multiple_count(&self) -> u32 {
        self.counters.multiple
    }

    pub fn outstanding_flag(&self) -> Option<Uuid> {
        self.outstanding
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    pub fn interval_ms(&self) -> i64 {
        self.config.tick_interval_ms
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

enum Recognition {
    Verified(Option<f64>),
    Mismatch(f64, Option<Signal>),
    Skipped,
    Incompatible,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t(tick: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::milliseconds(tick * 7_000)
    }

    fn verifier() -> IdentityVerifier {
        IdentityVerifier::new(IdentityConfig::default()).with_reference(vec![1.0, 0.0, 0.0])
    }

    fn face(tick: i64, embedding: Vec<f32>, spoof: f64) -> IdentityObservation {
        IdentityObservation {
            timestamp: t(tick),
            face_count: 1,
            spoof_probability: Some(spoof),
            embedding: Some(embedding),
        }
    }

    /// Unit vector with the given cosine similarity to [1, 0, 0]
    fn with_similarity(s: f32) -> Vec<f32> {
        vec![s, (1.0 - s * s).sqrt(), 0.0]
    }

    fn flags(signals: &[Signal]) -> Vec<Flag> {
        signals.iter().filter_map(|s| s.as_flag().cloned()).collect()
    }

    #[test]
    fn test_two_ticks_with_two_faces_flag_once() {
        let mut v = verifier();
        let mut all = Vec::new();
        for tick in 0..2 {
            all.extend(flags(&v.tick(&IdentityObservation::presence(t(tick), 2))));
        }
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].flag_type, FlagType::IdentityMultipleFaces);
        assert_eq!(all[0].severity, Severity::High);
        assert_eq!(v.state(), IdentityState::Warning);

        // Still outstanding: no duplicate
        assert!(flags(&v.tick(&IdentityObservation::presence(t(2), 2))).is_empty());
    }

    #[test]
    fn test_three_mismatches_flag_once_then_success_resets() {
        let mut v = verifier();
        let mut all = Vec::new();
        for tick in 0..3 {
            all.extend(flags(&v.tick(&face(tick, with_similarity(0.5), 0.1))));
        }
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].flag_type, FlagType::IdentityMismatch);
        assert_eq!(v.mismatch_count(), 3);

        let signals = v.tick(&face(3, with_similarity(0.9), 0.1));
        assert_eq!(v.mismatch_count(), 0);
        assert_eq!(v.state(), IdentityState::Active);
        assert!(signals
            .iter()
            .any(|s| matches!(s, Signal::Resolved { flag_id, .. } if *flag_id == all[0].id)));
        assert!(v.outstanding_flag().is_none());
    }

    #[test]
    fn test_two_mismatches_do_not_flag() {
        let mut v = verifier();
        for tick in 0..2 {
            assert!(flags(&v.tick(&face(tick, with_similarity(0.5), 0.1))).is_empty());
        }
        v.tick(&face(2, with_similarity(0.8), 0.1));
        assert!(flags(&v.tick(&face(3, with_similarity(0.5), 0.1))).is_empty());
        assert_eq!(v.mismatch_count(), 1);
    }

    #[test]
    fn test_impersonation_is_immediate() {
        let mut v = verifier();
        let signals = v.tick(&face(0, with_similarity(0.2), 0.6));
        let f = flags(&signals);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].flag_type, FlagType::Impersonation);
        assert_eq!(f[0].severity, Severity::High);
    }

    #[test]
    fn test_spoof_skips_recognition() {
        let mut v = verifier();
        let f = flags(&v.tick(&face(0, with_similarity(0.1), 0.9)));
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].flag_type, FlagType::SpoofDetected);
        assert_eq!(v.mismatch_count(), 0);
    }

    #[test]
    fn test_missing_flags_at_third_tick_and_resets_mismatch() {
        let mut v = verifier();
        v.tick(&face(0, with_similarity(0.5), 0.1));
        assert_eq!(v.mismatch_count(), 1);

        let mut all = Vec::new();
        for tick in 1..=3 {
            all.extend(flags(&v.tick(&IdentityObservation::presence(t(tick), 0))));
            if tick < 3 {
                assert!(all.is_empty());
            }
        }
        assert_eq!(v.mismatch_count(), 0);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].flag_type, FlagType::IdentityMissing);
        assert_eq!(all[0].severity, Severity::Medium);
    }

    #[test]
    fn test_presence_only_without_reference() {
        let mut v = IdentityVerifier::new(IdentityConfig::default());
        assert_eq!(v.state(), IdentityState::Initializing);
        v.tick(&face(0, vec![0.0, 1.0], 0.1));
        assert_eq!(v.state(), IdentityState::Active);
    }

    #[test]
    fn test_incompatible_embedding_enters_legacy() {
        let mut v = verifier();
        let signals = v.tick(&face(0, vec![1.0, 0.0], 0.1));
        assert!(signals.is_empty());
        assert_eq!(v.state(), IdentityState::Legacy);

        // Terminal: further ticks are ignored
        assert!(v.tick(&IdentityObservation::presence(t(1), 0)).is_empty());
        assert!(v.report_device_error(t(2), "gone").is_empty());
        assert_eq!(v.state(), IdentityState::Legacy);
    }

    #[test]
    fn test_enroll_builds_centroid_or_goes_legacy() {
        let mut v = IdentityVerifier::new(IdentityConfig::default());
        v.enroll(&[vec![1.0, 0.1, 0.0], vec![1.0, -0.1, 0.0]]).unwrap();
        assert!(v.has_reference());
        v.tick(&face(0, vec![1.0, 0.0, 0.0], 0.0));
        assert_eq!(v.state(), IdentityState::Active);

        let mut mixed = IdentityVerifier::new(IdentityConfig::default());
        assert!(mixed.enroll(&[vec![1.0, 0.0], vec![1.0]]).is_err());
        assert_eq!(mixed.state(), IdentityState::Legacy);
    }

    #[test]
    fn test_backend_failure_enters_error_then_recovers() {
        let mut v = verifier();
        let signals = v.report_device_error(t(0), "detector crashed");
        assert!(matches!(signals[0], Signal::DeviceError { modality: Modality::Identity, .. }));
        assert_eq!(flags(&signals).len(), 1);
        assert_eq!(v.state(), IdentityState::Error);

        v.tick(&face(1, with_similarity(0.95), 0.0));
        assert_eq!(v.state(), IdentityState::Active);
    }

    #[test]
    fn test_observation_from_sample() {
        let sample = IdentitySample {
            embedding: vec![0.5, 0.5],
            similarity: None,
            liveness_probability: 0.8,
        };
        let obs = IdentityObservation::from_sample(t(0), &sample);
        assert_eq!(obs.face_count, 1);
        assert!((obs.spoof_probability.unwrap() - 0.2).abs() < 1e-9);
    }
}
