//! Periodic tick source
//!
//! Each modality is driven by its own `TickLoop` thread (vision at ~8 Hz,
//! identity every 7 s). A tick runs while holding the loop's gate, so `stop`
//! returns only after any in-flight tick finishes, and a tick that wakes after
//! `stop` has taken the gate sees the stop flag and is discarded.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Vision frame interval (8 Hz)
pub const VISION_INTERVAL: Duration = Duration::from_millis(125);

struct Gate {
    running: Mutex<()>,
    stopped: AtomicBool,
    wake: Condvar,
    ticks: AtomicU64,
}

/// A background thread calling `tick` every `interval`
pub struct TickLoop {
    name: String,
    gate: Arc<Gate>,
    handle: Option<JoinHandle<()>>,
}

impl TickLoop {
    /// Spawn a loop. The first tick fires one interval after spawning.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let gate = Arc::new(Gate {
            running: Mutex::new(()),
            stopped: AtomicBool::new(false),
            wake: Condvar::new(),
            ticks: AtomicU64::new(0),
        });

        let worker_gate = Arc::clone(&gate);
        let handle = thread::Builder::new()
            .name(format!("tick-{name}"))
            .spawn(move || {
                let mut guard = worker_gate.running.lock();
                loop {
                    let deadline = Instant::now() + interval;
                    while !worker_gate.stopped.load(Ordering::Acquire) {
                        if worker_gate.wake.wait_until(&mut guard, deadline).timed_out() {
                            break;
                        }
                    }
                    if worker_gate.stopped.load(Ordering::Acquire) {
                        break;
                    }
                    tick();
                    worker_gate.ticks.fetch_add(1, Ordering::Relaxed);
                }
            })?;

        tracing::debug!(loop_name = %name, interval_ms = interval.as_millis() as u64, "tick loop started");
        Ok(Self {
            name,
            gate,
            handle: Some(handle),
        })
    }

    /// Halt the loop and wait for the thread to exit.
    ///
    /// Called from inside one of the loop's own ticks, this only marks the
    /// loop stopped; the thread exits once that tick returns.
    pub fn stop(&mut self) {
        self.gate.stopped.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        {
            let _guard = self.gate.running.lock();
            self.gate.wake.notify_all();
        }
        if handle.join().is_err() {
            tracing::warn!(loop_name = %self.name, "tick loop panicked");
        }
        tracing::debug!(loop_name = %self.name, "tick loop stopped");
    }

    /// Ticks completed so far
    pub fn ticks(&self) -> u64 {
        self.gate.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.gate.stopped.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TickLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
