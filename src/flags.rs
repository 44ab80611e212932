//! Flag emission and debounce
//!
//! Scorers decide *whether* a condition holds; `FlagPolicy` decides whether a
//! flag for it may be emitted now. Each flag type keeps its own debounce clock.
//! Everything a scorer produces leaves it as a `Signal` delivered to an
//! injected `SignalSink`.

use crate::clock::elapsed_ms;
use crate::types::{Device, Flag, FlagType, Modality, RiskSnapshot, Severity};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Output of the scoring pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    /// A debounced flag
    Flag(Flag),
    /// A previously emitted flag no longer applies
    Resolved {
        flag_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// Latest risk estimate for one modality
    Snapshot(RiskSnapshot),
    /// A capture device stopped delivering data
    DeviceError {
        modality: Modality,
        device: Device,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl Signal {
    pub fn as_flag(&self) -> Option<&Flag> {
        match self {
            Signal::Flag(flag) => Some(flag),
            _ => None,
        }
    }
}

/// Observer wired into a session at construction.
///
/// Implementations must not block; flag emission is fire-and-forget.
pub trait SignalSink: Send + Sync {
    fn emit(&self, signal: Signal);
}

/// Sink that keeps every signal in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    signals: Mutex<Vec<Signal>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything collected so far
    pub fn drain(&self) -> Vec<Signal> {
        std::mem::take(&mut *self.signals.lock())
    }

    pub fn flags(&self) -> Vec<Flag> {
        self.signals
            .lock()
            .iter()
            .filter_map(|s| s.as_flag().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.lock().is_empty()
    }
}

impl SignalSink for CollectingSink {
    fn emit(&self, signal: Signal) {
        self.signals.lock().push(signal);
    }
}

/// Per-type debounce bookkeeping for one scorer
#[derive(Debug, Clone, Default)]
pub struct FlagPolicy {
    windows_ms: HashMap<FlagType, i64>,
    last_emitted: HashMap<FlagType, DateTime<Utc>>,
}

impl FlagPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a flag type with its debounce window
    pub fn with_window(mut self, flag_type: FlagType, window_ms: i64) -> Self {
        self.windows_ms.insert(flag_type, window_ms.max(0));
        self
    }

    pub fn window_ms(&self, flag_type: FlagType) -> i64 {
        self.windows_ms.get(&flag_type).copied().unwrap_or(0)
    }

    /// Whether a flag of this type may be emitted at `now`
    pub fn can_emit(&self, flag_type: FlagType, now: DateTime<Utc>) -> bool {
        match self.last_emitted.get(&flag_type) {
            None => true,
            Some(last) => elapsed_ms(*last, now) >= self.window_ms(flag_type),
        }
    }

    /// Build and record a flag if its debounce window has elapsed
    pub fn try_emit(
        &mut self,
        flag_type: FlagType,
        severity: Severity,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Option<Flag> {
        if !self.can_emit(flag_type, now) {
            tracing::trace!(flag = flag_type.as_str(), "flag suppressed by debounce");
            return None;
        }
        self.last_emitted.insert(flag_type, now);
        let flag = Flag::new(flag_type, severity, message, now);
        tracing::info!(
            flag = flag_type.as_str(),
            severity = ?severity,
            message = %flag.message,
            "flag emitted"
        );
        Some(flag)
    }

    pub fn last_emitted(&self, flag_type: FlagType) -> Option<DateTime<Utc>> {
        self.last_emitted.get(&flag_type).copied()
    }

    pub fn reset(&mut self) {
        self.last_emitted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_debounce_suppresses_within_window() {
        let mut policy = FlagPolicy::new().with_window(FlagType::VisionRisk, 5_000);

        assert!(policy
            .try_emit(FlagType::VisionRisk, Severity::Medium, "a", t0())
            .is_some());
        assert!(policy
            .try_emit(FlagType::VisionRisk, Severity::Medium, "b", t0() + Duration::milliseconds(4_999))
            .is_none());
        assert!(policy
            .try_emit(FlagType::VisionRisk, Severity::Medium, "c", t0() + Duration::milliseconds(5_000))
            .is_some());
    }

    #[test]
    fn test_flag_types_have_independent_clocks() {
        let mut policy = FlagPolicy::new()
            .with_window(FlagType::VisionRisk, 5_000)
            .with_window(FlagType::MultipleFaces, 10_000);

        assert!(policy
            .try_emit(FlagType::VisionRisk, Severity::Medium, "gaze", t0())
            .is_some());
        assert!(policy
            .try_emit(FlagType::MultipleFaces, Severity::High, "faces", t0())
            .is_some());

        let later = t0() + Duration::milliseconds(6_000);
        assert!(policy.can_emit(FlagType::VisionRisk, later));
        assert!(!policy.can_emit(FlagType::MultipleFaces, later));
    }

    #[test]
    fn test_emitted_flags_never_closer_than_window() {
        let mut policy = FlagPolicy::new().with_window(FlagType::AudioRisk, 5_000);
        let mut emitted = Vec::new();

        // Irregular tick spacing
        let mut at = t0();
        for step in [0, 130, 700, 2_200, 1_900, 90, 4_000, 800, 6_000, 10] {
            at += Duration::milliseconds(step);
            if let Some(flag) = policy.try_emit(FlagType::AudioRisk, Severity::Medium, "x", at) {
                emitted.push(flag.timestamp);
            }
        }

        assert!(emitted.len() >= 2);
        for pair in emitted.windows(2) {
            assert!(elapsed_ms(pair[0], pair[1]) >= 5_000);
        }
    }

    #[test]
    fn test_collecting_sink_drains() {
        let sink = CollectingSink::new();
        sink.emit(Signal::Flag(Flag::new(
            FlagType::DeviceError,
            Severity::Medium,
            "camera",
            t0(),
        )));
        assert_eq!(sink.flags().len(), 1);
        assert_eq!(sink.drain().len(), 1);
        assert!(sink.is_empty());
    }
}
