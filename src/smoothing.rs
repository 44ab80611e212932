//! Smoothing and rolling-window primitives
//!
//! `ExponentialSmoother` is the low-pass filter applied to every sub-score and
//! composite. `EventWindow` keeps event timestamps and evicts them by
//! wall-clock age, never by count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Smoothing factor used by all scorers
pub const DEFAULT_ALPHA: f64 = 0.3;

/// Exponential moving average over a single value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExponentialSmoother {
    alpha: f64,
    value: Option<f64>,
}

impl Default for ExponentialSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

impl ExponentialSmoother {
    /// Create a smoother; alpha is clamped to (0, 1]
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            value: None,
        }
    }

    /// Feed a raw value and return the smoothed result
    pub fn update(&mut self, raw: f64) -> f64 {
        let next = match self.value {
            None => raw,
            Some(prev) => self.alpha * raw + (1.0 - self.alpha) * prev,
        };
        self.value = Some(next);
        next
    }

    /// Current value, or 0 before the first update
    pub fn get(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }

    pub fn is_initialized(&self) -> bool {
        self.value.is_some()
    }

    pub fn reset(&mut self) {
        self.value = None;
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

/// Timestamps of recorded events within a trailing time horizon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventWindow {
    horizon_ms: i64,
    events: VecDeque<DateTime<Utc>>,
}

impl EventWindow {
    pub fn new(horizon_ms: i64) -> Self {
        Self {
            horizon_ms,
            events: VecDeque::new(),
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        self.events.push_back(at);
    }

    /// Drop events older than the horizon relative to `now`
    pub fn evict(&mut self, now: DateTime<Utc>) {
        while let Some(front) = self.events.front() {
            if (now - *front).num_milliseconds() > self.horizon_ms {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of events still inside the horizon at `now`
    pub fn count(&mut self, now: DateTime<Utc>) -> usize {
        self.evict(now);
        self.events.len()
    }

    /// Most recently recorded event, if any
    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.events.back().copied()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_first_update_takes_raw_value() {
        let mut smoother = ExponentialSmoother::new(0.3);
        assert_eq!(smoother.get(), 0.0);
        assert_eq!(smoother.update(0.8), 0.8);
    }

    #[test]
    fn test_update_blends_with_alpha() {
        let mut smoother = ExponentialSmoother::new(0.3);
        smoother.update(1.0);
        let v = smoother.update(0.0);
        assert!((v - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_reset_clears_value() {
        let mut smoother = ExponentialSmoother::default();
        smoother.update(0.4);
        smoother.reset();
        assert!(!smoother.is_initialized());
        assert_eq!(smoother.update(0.9), 0.9);
    }

    #[test]
    fn test_smoothed_values_stay_in_unit_range() {
        let mut smoother = ExponentialSmoother::default();
        let inputs = [0.0, 1.0, 0.3, 1.0, 1.0, 0.0, 0.5, 0.99, 0.01];
        for raw in inputs {
            let v = smoother.update(raw);
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_event_window_evicts_by_age() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut window = EventWindow::new(300_000);

        window.record(t0);
        window.record(t0 + Duration::seconds(100));
        assert_eq!(window.count(t0 + Duration::seconds(200)), 2);

        // First event is now 301s old
        assert_eq!(window.count(t0 + Duration::seconds(301)), 1);
        assert_eq!(window.count(t0 + Duration::seconds(401)), 0);
        assert!(window.last().is_none());
    }
}
