//! Evidence capture
//!
//! A rolling media buffer plus a serial upload queue. When a flag fires, the
//! last few seconds of media are cut from the buffer and queued for upload
//! under a generated key; the upload links the stored clip back to the flag.

pub mod buffer;
pub mod upload;

pub use buffer::{Clip, EvidenceBuffer, MediaChunk};
pub use upload::{
    DrainOutcome, EvidenceStorage, MemoryStorage, UploadItem, UploadQueue, UploadWorker,
};

use crate::clock::Clock;
use crate::config::EvidenceConfig;
use crate::scheduler::TickLoop;
use crate::types::{EvidenceClip, UploadState};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Longest wait between post-stop sweeps of the buffer
const MAX_SWEEP_INTERVAL_MS: i64 = 1_000;

/// Buffer and upload queue for one session
pub struct EvidenceRecorder {
    config: EvidenceConfig,
    buffer: Arc<EvidenceBuffer>,
    queue: Arc<UploadQueue>,
    sweeper: Mutex<Option<TickLoop>>,
}

impl EvidenceRecorder {
    pub fn new(
        config: EvidenceConfig,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn EvidenceStorage>,
    ) -> Self {
        let buffer = Arc::new(EvidenceBuffer::new(&config, clock));
        let queue = Arc::new(UploadQueue::new(storage, config.retry_delay_ms));
        Self {
            config,
            buffer,
            queue,
            sweeper: Mutex::new(None),
        }
    }

    pub fn push_chunk(&self, chunk: MediaChunk) -> bool {
        self.buffer.push_chunk(chunk)
    }

    /// Cut a clip for `flag_id` and queue it for upload.
    ///
    /// Returns the evidence record, or `None` when the buffer holds nothing
    /// recent enough to cut.
    pub fn capture_for_flag(
        &self,
        session_id: &str,
        flag_id: Uuid,
        duration_seconds: Option<u32>,
    ) -> Option<EvidenceClip> {
        let seconds = duration_seconds.unwrap_or(self.config.clip_seconds);
        let Some(clip) = self.buffer.extract_clip(seconds) else {
            tracing::debug!(%flag_id, "no buffered media for flag");
            return None;
        };

        let key = self.clip_key(session_id, flag_id);
        self.queue.enqueue(UploadItem::new(
            flag_id,
            key.clone(),
            self.config.content_type.clone(),
            clip.bytes(),
        ));
        Some(EvidenceClip {
            session_id: session_id.to_string(),
            flag_id,
            media_ref: key,
            upload_state: UploadState::Queued,
        })
    }

    fn clip_key(&self, session_id: &str, flag_id: Uuid) -> String {
        let extension = self
            .config
            .content_type
            .rsplit('/')
            .next()
            .filter(|ext| !ext.is_empty())
            .unwrap_or("bin");
        format!(
            "{}/{}/{}.{}",
            self.config.key_prefix, session_id, flag_id, extension
        )
    }

    pub fn buffer(&self) -> &EvidenceBuffer {
        &self.buffer
    }

    pub fn queue(&self) -> &Arc<UploadQueue> {
        &self.queue
    }

    pub fn upload_status(&self, flag_id: Uuid) -> Option<UploadState> {
        self.queue.status(flag_id)
    }

    /// Stop recording; buffered media remains for the grace period.
    ///
    /// A background sweep clears the buffer once the grace has passed, even if
    /// nothing reads it again.
    pub fn stop(&self) {
        self.buffer.stop();
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let interval_ms = self.buffer.stop_grace_ms().clamp(1, MAX_SWEEP_INTERVAL_MS) as u64;
        let buffer = Arc::clone(&self.buffer);
        let mut cleared = false;
        match TickLoop::spawn("evidence-sweep", Duration::from_millis(interval_ms), move || {
            if !cleared {
                cleared = buffer.sweep();
            }
        }) {
            Ok(tick_loop) => *sweeper = Some(tick_loop),
            Err(err) => {
                tracing::warn!(error = %err, "evidence sweep not started; buffer clears on next read");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(sec: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(sec)
    }

    #[test]
    fn test_capture_queues_clip_under_generated_key() {
        let clock = Arc::new(ManualClock::new(t(0)));
        let storage = Arc::new(MemoryStorage::new());
        let recorder = EvidenceRecorder::new(EvidenceConfig::default(), clock.clone(), storage.clone());

        for s in 0..=12 {
            clock.set(t(s));
            recorder.push_chunk(MediaChunk::new(t(s), vec![s as u8]));
        }

        let flag_id = Uuid::new_v4();
        let clip = recorder.capture_for_flag("exam-1", flag_id, None).unwrap();
        assert_eq!(clip.media_ref, format!("evidence/exam-1/{flag_id}.webm"));
        assert_eq!(recorder.upload_status(flag_id), Some(UploadState::Queued));

        recorder.queue().drain_pass();
        assert_eq!(storage.object_count(), 1);
        assert_eq!(
            storage.object(&clip.media_ref),
            Some((3..=12).collect::<Vec<u8>>())
        );
        assert_eq!(recorder.upload_status(flag_id), Some(UploadState::Linked));
        assert_eq!(
            storage.link_for(flag_id),
            Some(format!("memory://{}", clip.media_ref))
        );
    }

    #[test]
    fn test_stopped_buffer_cleared_without_reads() {
        let clock = Arc::new(ManualClock::new(t(0)));
        let config = EvidenceConfig {
            stop_grace_ms: 20,
            ..EvidenceConfig::default()
        };
        let recorder = EvidenceRecorder::new(config, clock.clone(), Arc::new(MemoryStorage::new()));
        for s in 0..=3 {
            clock.set(t(s));
            recorder.push_chunk(MediaChunk::new(t(s), vec![1]));
        }

        recorder.stop();
        assert_eq!(recorder.buffer().held_chunks(), 4);

        clock.set(t(4));
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while recorder.buffer().held_chunks() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(recorder.buffer().held_chunks(), 0);
    }

    #[test]
    fn test_capture_with_empty_buffer_queues_nothing() {
        let clock = Arc::new(ManualClock::new(t(0)));
        let recorder = EvidenceRecorder::new(
            EvidenceConfig::default(),
            clock,
            Arc::new(MemoryStorage::new()),
        );
        assert!(recorder.capture_for_flag("exam-1", Uuid::new_v4(), Some(5)).is_none());
        assert!(recorder.queue().is_empty());
    }
}
