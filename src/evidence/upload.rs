//! Evidence upload queue
//!
//! Serial, non-re-entrant drain: one item at a time is stored and linked to
//! its flag. A failed item goes to the back of the queue and the drain backs
//! off; items are reordered but never dropped. Enqueues are accepted while a
//! drain is in flight and picked up by the same pass.

use crate::error::ProctorError;
use crate::types::UploadState;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Linked uploads whose status and reference stay queryable. Older ones are
/// forgotten; pending and failed items are always kept.
pub const LINKED_HISTORY: usize = 256;

/// Durable destination for evidence clips
pub trait EvidenceStorage: Send + Sync {
    /// Store clip bytes under `key`; returns a durable reference
    fn store(&self, bytes: &[u8], key: &str, content_type: &str) -> Result<String, ProctorError>;

    /// Attach a stored reference to the flag it was captured for
    fn link(&self, flag_id: Uuid, reference: &str) -> Result<(), ProctorError>;
}

/// In-process storage; keeps clips in memory and records links
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    links: Mutex<HashMap<Uuid, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).cloned()
    }

    pub fn link_for(&self, flag_id: Uuid) -> Option<String> {
        self.links.lock().get(&flag_id).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }
}

impl EvidenceStorage for MemoryStorage {
    fn store(&self, bytes: &[u8], key: &str, _content_type: &str) -> Result<String, ProctorError> {
        self.objects.lock().insert(key.to_string(), bytes.to_vec());
        Ok(format!("memory://{key}"))
    }

    fn link(&self, flag_id: Uuid, reference: &str) -> Result<(), ProctorError> {
        self.links.lock().insert(flag_id, reference.to_string());
        Ok(())
    }
}

/// A clip waiting to be uploaded
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub flag_id: Uuid,
    pub key: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    /// Failed attempts so far
    pub attempts: u32,
    /// Reference from a successful store whose link step failed
    stored_ref: Option<String>,
}

impl UploadItem {
    pub fn new(flag_id: Uuid, key: String, content_type: String, bytes: Vec<u8>) -> Self {
        Self {
            flag_id,
            key,
            content_type,
            bytes,
            attempts: 0,
            stored_ref: None,
        }
    }
}

/// Result of one drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue is empty; `uploaded` items were linked in this pass
    Drained { uploaded: usize },
    /// An item failed and was requeued; retry after the delay
    Backoff { uploaded: usize, retry_in_ms: i64 },
    /// Another drain is already in flight
    Busy,
}

#[derive(Debug, Default)]
struct QueueInner {
    items: VecDeque<UploadItem>,
    states: HashMap<Uuid, UploadState>,
    references: HashMap<Uuid, String>,
    /// Linked flag ids, oldest first
    linked: VecDeque<Uuid>,
    shutdown: bool,
}

impl QueueInner {
    fn mark_linked(&mut self, flag_id: Uuid, reference: String) {
        self.states.insert(flag_id, UploadState::Linked);
        self.references.insert(flag_id, reference);
        self.linked.push_back(flag_id);
        while self.linked.len() > LINKED_HISTORY {
            if let Some(old) = self.linked.pop_front() {
                self.states.remove(&old);
                self.references.remove(&old);
            }
        }
    }
}

/// Serial upload queue for evidence clips
pub struct UploadQueue {
    storage: Arc<dyn EvidenceStorage>,
    retry_delay_ms: i64,
    inner: Mutex<QueueInner>,
    wake: Condvar,
    draining: AtomicBool,
}

impl UploadQueue {
    pub fn new(storage: Arc<dyn EvidenceStorage>, retry_delay_ms: i64) -> Self {
        Self {
            storage,
            retry_delay_ms: retry_delay_ms.max(0),
            inner: Mutex::new(QueueInner::default()),
            wake: Condvar::new(),
            draining: AtomicBool::new(false),
        }
    }

    pub fn enqueue(&self, item: UploadItem) {
        let mut inner = self.inner.lock();
        tracing::debug!(flag_id = %item.flag_id, key = %item.key, "evidence queued");
        inner.states.insert(item.flag_id, UploadState::Queued);
        inner.items.push_back(item);
        self.wake.notify_one();
    }

    /// Upload queued items in order until the queue is empty or one fails
    pub fn drain_pass(&self) -> DrainOutcome {
        if self.draining.swap(true, Ordering::AcqRel) {
            return DrainOutcome::Busy;
        }
        let mut uploaded = 0;
        let outcome = loop {
            let Some(mut item) = self.next_item() else {
                break DrainOutcome::Drained { uploaded };
            };

            match self.upload(&mut item) {
                Ok(reference) => {
                    self.inner.lock().mark_linked(item.flag_id, reference);
                    uploaded += 1;
                }
                Err(err) => {
                    item.attempts += 1;
                    tracing::warn!(
                        flag_id = %item.flag_id,
                        attempts = item.attempts,
                        error = %err,
                        "evidence upload failed, requeued"
                    );
                    let mut inner = self.inner.lock();
                    inner.states.insert(item.flag_id, UploadState::Failed);
                    inner.items.push_back(item);
                    break DrainOutcome::Backoff {
                        uploaded,
                        retry_in_ms: self.retry_delay_ms,
                    };
                }
            }
        };
        self.draining.store(false, Ordering::Release);
        outcome
    }

    fn next_item(&self) -> Option<UploadItem> {
        let mut inner = self.inner.lock();
        let item = inner.items.pop_front()?;
        inner.states.insert(item.flag_id, UploadState::Uploading);
        Some(item)
    }

    fn upload(&self, item: &mut UploadItem) -> Result<String, ProctorError> {
        let reference = match &item.stored_ref {
            Some(reference) => reference.clone(),
            None => {
                let reference = self
                    .storage
                    .store(&item.bytes, &item.key, &item.content_type)?;
                item.stored_ref = Some(reference.clone());
                reference
            }
        };
        self.storage.link(item.flag_id, &reference)?;
        tracing::debug!(flag_id = %item.flag_id, %reference, "evidence linked");
        Ok(reference)
    }

    /// Upload state for a flag; `None` once a linked entry ages out of
    /// the last `LINKED_HISTORY` uploads
    pub fn status(&self, flag_id: Uuid) -> Option<UploadState> {
        self.inner.lock().states.get(&flag_id).copied()
    }

    /// Durable reference for a linked clip
    pub fn reference(&self, flag_id: Uuid) -> Option<String> {
        self.inner.lock().references.get(&flag_id).cloned()
    }

    /// Items waiting, including failed ones awaiting retry
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued flag ids, front first
    pub fn pending(&self) -> Vec<Uuid> {
        self.inner.lock().items.iter().map(|i| i.flag_id).collect()
    }

    /// Run the drain loop on a background thread
    pub fn spawn_worker(self: &Arc<Self>) -> UploadWorker {
        self.inner.lock().shutdown = false;
        let queue = Arc::clone(self);
        let handle = thread::spawn(move || queue.worker_loop());
        UploadWorker {
            queue: Arc::clone(self),
            handle: Some(handle),
        }
    }

    fn worker_loop(&self) {
        loop {
            {
                let mut inner = self.inner.lock();
                while inner.items.is_empty() && !inner.shutdown {
                    self.wake.wait(&mut inner);
                }
                if inner.shutdown {
                    return;
                }
            }

            if let DrainOutcome::Backoff { retry_in_ms, .. } = self.drain_pass() {
                let deadline = Instant::now() + Duration::from_millis(retry_in_ms as u64);
                let mut inner = self.inner.lock();
                // New enqueues must not cut the backoff short
                while !inner.shutdown {
                    if self.wake.wait_until(&mut inner, deadline).timed_out() {
                        break;
                    }
                }
                if inner.shutdown {
                    return;
                }
            }
        }
    }

    fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        self.wake.notify_all();
    }
}

/// Handle to the background drain thread; stops it on drop
pub struct UploadWorker {
    queue: Arc<UploadQueue>,
    handle: Option<JoinHandle<()>>,
}

impl UploadWorker {
    /// Stop the drain thread and wait for it. Queued items stay queued.
    pub fn stop(&mut self) {
        self.queue.shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("upload worker panicked");
            }
        }
    }
}

impl Drop for UploadWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Storage that fails the first `failures` store calls
    #[derive(Default)]
    struct FlakyStorage {
        failures: Mutex<u32>,
        stored: Mutex<Vec<String>>,
        links: Mutex<Vec<Uuid>>,
    }

    impl FlakyStorage {
        fn failing(n: u32) -> Self {
            Self {
                failures: Mutex::new(n),
                ..Self::default()
            }
        }
    }

    impl EvidenceStorage for FlakyStorage {
        fn store(&self, _bytes: &[u8], key: &str, _content_type: &str) -> Result<String, ProctorError> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ProctorError::StorageError("network down".to_string()));
            }
            self.stored.lock().push(key.to_string());
            Ok(format!("store://{key}"))
        }

        fn link(&self, flag_id: Uuid, _reference: &str) -> Result<(), ProctorError> {
            self.links.lock().push(flag_id);
            Ok(())
        }
    }

    fn item(key: &str) -> UploadItem {
        UploadItem::new(Uuid::new_v4(), key.to_string(), "video/webm".to_string(), vec![1, 2, 3])
    }

    #[test]
    fn test_successful_drain_links_everything() {
        let storage = Arc::new(FlakyStorage::default());
        let queue = UploadQueue::new(storage.clone(), 5_000);
        let a = item("a");
        let b = item("b");
        let (a_id, b_id) = (a.flag_id, b.flag_id);
        queue.enqueue(a);
        queue.enqueue(b);
        assert_eq!(queue.status(a_id), Some(UploadState::Queued));

        assert_eq!(queue.drain_pass(), DrainOutcome::Drained { uploaded: 2 });
        assert_eq!(*storage.links.lock(), vec![a_id, b_id]);
        assert_eq!(queue.status(b_id), Some(UploadState::Linked));
        assert_eq!(queue.reference(a_id).as_deref(), Some("store://a"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failure_requeues_at_tail_and_backs_off() {
        let storage = Arc::new(FlakyStorage::failing(1));
        let queue = UploadQueue::new(storage.clone(), 5_000);
        let a = item("a");
        let b = item("b");
        let (a_id, b_id) = (a.flag_id, b.flag_id);
        queue.enqueue(a);
        queue.enqueue(b);

        assert_eq!(
            queue.drain_pass(),
            DrainOutcome::Backoff {
                uploaded: 0,
                retry_in_ms: 5_000
            }
        );
        assert_eq!(queue.pending(), vec![b_id, a_id]);
        assert_eq!(queue.status(a_id), Some(UploadState::Failed));

        assert_eq!(queue.drain_pass(), DrainOutcome::Drained { uploaded: 2 });
        assert_eq!(*storage.links.lock(), vec![b_id, a_id]);
    }

    #[test]
    fn test_items_survive_repeated_failures() {
        let storage = Arc::new(FlakyStorage::failing(5));
        let queue = UploadQueue::new(storage.clone(), 5_000);
        let a = item("a");
        let a_id = a.flag_id;
        queue.enqueue(a);

        for _ in 0..5 {
            assert!(matches!(queue.drain_pass(), DrainOutcome::Backoff { .. }));
            assert_eq!(queue.len(), 1);
        }
        assert_eq!(queue.drain_pass(), DrainOutcome::Drained { uploaded: 1 });
        assert_eq!(queue.status(a_id), Some(UploadState::Linked));
    }

    /// Storage that enqueues and tries to re-enter the drain while storing
    struct ReentrantStorage {
        queue: Mutex<Option<Arc<UploadQueue>>>,
        nested: Mutex<Vec<DrainOutcome>>,
        enqueued: AtomicBool,
    }

    impl EvidenceStorage for ReentrantStorage {
        fn store(&self, _bytes: &[u8], key: &str, _content_type: &str) -> Result<String, ProctorError> {
            if let Some(queue) = self.queue.lock().clone() {
                self.nested.lock().push(queue.drain_pass());
                if !self.enqueued.swap(true, Ordering::SeqCst) {
                    queue.enqueue(item("late"));
                }
            }
            Ok(key.to_string())
        }

        fn link(&self, _flag_id: Uuid, _reference: &str) -> Result<(), ProctorError> {
            Ok(())
        }
    }

    #[test]
    fn test_drain_is_not_reentrant_and_accepts_enqueues_mid_drain() {
        let storage = Arc::new(ReentrantStorage {
            queue: Mutex::new(None),
            nested: Mutex::new(Vec::new()),
            enqueued: AtomicBool::new(false),
        });
        let queue = Arc::new(UploadQueue::new(storage.clone(), 5_000));
        *storage.queue.lock() = Some(Arc::clone(&queue));

        queue.enqueue(item("first"));
        assert_eq!(queue.drain_pass(), DrainOutcome::Drained { uploaded: 2 });
        assert!(storage.nested.lock().iter().all(|o| *o == DrainOutcome::Busy));

        // Break the test-only cycle
        storage.queue.lock().take();
    }

    #[test]
    fn test_worker_retries_until_linked() {
        let storage = Arc::new(FlakyStorage::failing(2));
        let queue = Arc::new(UploadQueue::new(storage.clone(), 10));
        let mut worker = queue.spawn_worker();

        let a = item("a");
        let a_id = a.flag_id;
        queue.enqueue(a);

        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.status(a_id) != Some(UploadState::Linked) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        worker.stop();
        assert_eq!(queue.status(a_id), Some(UploadState::Linked));
    }

    #[test]
    fn test_linked_history_is_bounded() {
        let queue = UploadQueue::new(Arc::new(MemoryStorage::new()), 0);
        let ids: Vec<Uuid> = (0..LINKED_HISTORY + 10).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            queue.enqueue(UploadItem::new(*id, format!("k{i}"), "video/webm".into(), vec![1]));
        }
        assert_eq!(
            queue.drain_pass(),
            DrainOutcome::Drained {
                uploaded: LINKED_HISTORY + 10
            }
        );

        let inner = queue.inner.lock();
        assert_eq!(inner.states.len(), LINKED_HISTORY);
        assert_eq!(inner.references.len(), LINKED_HISTORY);
        drop(inner);
        assert_eq!(queue.status(ids[0]), None);
        assert_eq!(queue.status(ids[9]), None);
        assert_eq!(queue.status(ids[10]), Some(UploadState::Linked));
        assert!(queue.reference(ids[LINKED_HISTORY + 9]).is_some());
    }
}
