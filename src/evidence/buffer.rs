//! Rolling media buffer
//!
//! Holds the last few seconds of recorded media so a clip can be cut around a
//! flag after the fact. Append, prune, and extract run under one lock.

use crate::clock::{elapsed_ms, Clock};
use crate::config::EvidenceConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// One chunk delivered by the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaChunk {
    pub timestamp: DateTime<Utc>,
    pub data: Vec<u8>,
}

impl MediaChunk {
    pub fn new(timestamp: DateTime<Utc>, data: Vec<u8>) -> Self {
        Self { timestamp, data }
    }
}

/// Chunks cut from the buffer, oldest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clip {
    pub chunks: Vec<MediaChunk>,
}

impl Clip {
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.chunks.first().map(|c| c.timestamp)
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.chunks.last().map(|c| c.timestamp)
    }

    /// Concatenated chunk payloads
    pub fn bytes(&self) -> Vec<u8> {
        let len = self.chunks.iter().map(|c| c.data.len()).sum();
        let mut out = Vec::with_capacity(len);
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.data);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[derive(Debug, Default)]
struct BufferInner {
    chunks: VecDeque<MediaChunk>,
    recording: bool,
    stopped_at: Option<DateTime<Utc>>,
}

/// Time-bounded circular buffer of recorded media
pub struct EvidenceBuffer {
    clock: Arc<dyn Clock>,
    retention_ms: i64,
    stop_grace_ms: i64,
    inner: Mutex<BufferInner>,
}

impl EvidenceBuffer {
    pub fn new(config: &EvidenceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            retention_ms: config.retention_ms,
            stop_grace_ms: config.stop_grace_ms,
            inner: Mutex::new(BufferInner {
                recording: true,
                ..BufferInner::default()
            }),
        }
    }

    /// Append a chunk and prune everything past the retention window.
    ///
    /// Returns `false` if recording has stopped and the chunk was dropped.
    pub fn push_chunk(&self, chunk: MediaChunk) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if !inner.recording {
            return false;
        }
        inner.chunks.push_back(chunk);
        while let Some(front) = inner.chunks.front() {
            if elapsed_ms(front.timestamp, now) > self.retention_ms {
                inner.chunks.pop_front();
            } else {
                break;
            }
        }
        true
    }

    /// Cut the newest `duration_seconds` of media.
    ///
    /// Scans newest to oldest and stops at the first chunk at or before the
    /// cutoff. `None` when nothing falls inside the window.
    pub fn extract_clip(&self, duration_seconds: u32) -> Option<Clip> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.expire_after_stop(&mut inner, now);

        let window_ms = duration_seconds as i64 * 1_000;
        let mut chunks: Vec<MediaChunk> = inner
            .chunks
            .iter()
            .rev()
            .take_while(|c| elapsed_ms(c.timestamp, now) < window_ms)
            .cloned()
            .collect();
        if chunks.is_empty() {
            return None;
        }
        chunks.reverse();
        Some(Clip { chunks })
    }

    /// Stop recording. Buffered media stays extractable for the grace period.
    pub fn stop(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if inner.recording {
            inner.recording = false;
            inner.stopped_at = Some(now);
            tracing::debug!(chunks = inner.chunks.len(), "evidence recording stopped");
        }
    }

    fn expire_after_stop(&self, inner: &mut BufferInner, now: DateTime<Utc>) {
        if let Some(stopped_at) = inner.stopped_at {
            if elapsed_ms(stopped_at, now) >= self.stop_grace_ms && !inner.chunks.is_empty() {
                tracing::debug!("evidence buffer cleared after stop grace");
                inner.chunks.clear();
            }
        }
    }

    /// Clear buffered media once the stop grace has passed.
    ///
    /// Returns `true` when nothing is left buffered.
    pub fn sweep(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.expire_after_stop(&mut inner, now);
        inner.chunks.is_empty()
    }

    /// Grace period media is kept after `stop`
    pub fn stop_grace_ms(&self) -> i64 {
        self.stop_grace_ms
    }

    #[cfg(test)]
    pub(crate) fn held_chunks(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().recording
    }

    /// Buffered chunk count (after any pending post-stop clear)
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.expire_after_stop(&mut inner, now);
        inner.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t(sec: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(sec)
    }

    fn filled(clock: &Arc<ManualClock>, seconds: i64) -> EvidenceBuffer {
        let buffer = EvidenceBuffer::new(&EvidenceConfig::default(), clock.clone());
        for s in 0..=seconds {
            clock.set(t(s));
            assert!(buffer.push_chunk(MediaChunk::new(t(s), vec![s as u8])));
        }
        buffer
    }

    #[test]
    fn test_clip_covers_last_ten_seconds() {
        let clock = Arc::new(ManualClock::new(t(0)));
        let buffer = filled(&clock, 40);

        let clip = buffer.extract_clip(10).unwrap();
        let seconds: Vec<u8> = clip.chunks.iter().map(|c| c.data[0]).collect();
        assert_eq!(seconds, (31..=40).collect::<Vec<u8>>());
        assert_eq!(clip.start(), Some(t(31)));
        assert_eq!(clip.end(), Some(t(40)));
    }

    #[test]
    fn test_extract_is_idempotent() {
        let clock = Arc::new(ManualClock::new(t(0)));
        let buffer = filled(&clock, 40);
        assert_eq!(buffer.extract_clip(10), buffer.extract_clip(10));
    }

    #[test]
    fn test_retention_prunes_old_chunks() {
        let clock = Arc::new(ManualClock::new(t(0)));
        let buffer = filled(&clock, 40);
        // t=10..40 are within 30 s of t=40
        assert_eq!(buffer.len(), 31);
    }

    #[test]
    fn test_empty_buffer_yields_none() {
        let clock = Arc::new(ManualClock::new(t(0)));
        let buffer = EvidenceBuffer::new(&EvidenceConfig::default(), clock.clone());
        assert!(buffer.extract_clip(10).is_none());

        buffer.push_chunk(MediaChunk::new(t(0), vec![1]));
        clock.set(t(20));
        assert!(buffer.extract_clip(10).is_none());
    }

    #[test]
    fn test_stop_keeps_buffer_for_grace_period() {
        let clock = Arc::new(ManualClock::new(t(0)));
        let buffer = filled(&clock, 20);
        buffer.stop();
        assert!(!buffer.is_recording());
        assert!(!buffer.push_chunk(MediaChunk::new(t(20), vec![99])));

        clock.set(t(25));
        assert!(buffer.extract_clip(10).is_some());

        clock.set(t(35));
        assert!(buffer.extract_clip(30).is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clip_bytes_concatenate_in_order() {
        let clock = Arc::new(ManualClock::new(t(0)));
        let buffer = filled(&clock, 3);
        assert_eq!(buffer.extract_clip(10).unwrap().bytes(), vec![0, 1, 2, 3]);
    }
}
