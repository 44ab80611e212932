//! Per-session context
//!
//! One `ProctorSession` is built per exam session and owns everything that
//! session needs: the three scorers, the fusion bridge, the evidence recorder,
//! the optional capture adapters, and the sink signals are delivered to.
//! Each modality sits behind its own lock so vision, audio, and identity can
//! tick from separate threads; the only state they share is the bridge.
//! `start_capture` runs the vision and identity ticks on `TickLoop`s the
//! session owns, and `stop` joins them before returning.

use crate::adapters::{
    observe_identity, vision_sample, AudioFeatureAdapter, AudioFrame, FaceBackend, FrameSource,
    SpeechEvent, VideoFrame, VisionAdapter,
};
use crate::audio::AudioScorer;
use crate::clock::Clock;
use crate::config::ProctorConfig;
use crate::error::ProctorError;
use crate::evidence::{EvidenceRecorder, EvidenceStorage, MediaChunk, UploadWorker};
use crate::flags::{Signal, SignalSink};
use crate::fusion::MouthMotionBridge;
use crate::identity::{IdentityObservation, IdentityState, IdentityVerifier};
use crate::scheduler::{TickLoop, VISION_INTERVAL};
use crate::schema::InputRecord;
use crate::types::{AudioSample, Modality, UploadState, VisionSample};
use crate::vision::VisionScorer;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use uuid::Uuid;

/// Scoring context for one exam session
pub struct ProctorSession {
    session_id: String,
    config: ProctorConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn SignalSink>,
    bridge: Arc<MouthMotionBridge>,
    vision: Mutex<VisionScorer>,
    audio: Mutex<AudioScorer>,
    identity: Mutex<IdentityVerifier>,
    evidence: EvidenceRecorder,
    vision_adapter: Mutex<Option<Box<dyn VisionAdapter>>>,
    audio_adapter: Mutex<Option<Box<dyn AudioFeatureAdapter>>>,
    face_backend: Mutex<Option<Box<dyn FaceBackend>>>,
    capture_loops: Mutex<Vec<TickLoop>>,
    stopped: AtomicBool,
}

impl ProctorSession {
    /// Build a session. The configuration is validated first.
    pub fn new(
        session_id: impl Into<String>,
        config: ProctorConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn SignalSink>,
        storage: Arc<dyn EvidenceStorage>,
    ) -> Result<Self, ProctorError> {
        config.validate()?;
        let bridge = Arc::new(MouthMotionBridge::new());
        Ok(Self {
            session_id: session_id.into(),
            vision: Mutex::new(VisionScorer::new(config.vision.clone(), Arc::clone(&bridge))),
            audio: Mutex::new(AudioScorer::new(config.audio.clone(), Arc::clone(&bridge))),
            identity: Mutex::new(IdentityVerifier::new(config.identity.clone())),
            evidence: EvidenceRecorder::new(config.evidence.clone(), Arc::clone(&clock), storage),
            config,
            clock,
            sink,
            bridge,
            vision_adapter: Mutex::new(None),
            audio_adapter: Mutex::new(None),
            face_backend: Mutex::new(None),
            capture_loops: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn with_vision_adapter(self, adapter: Box<dyn VisionAdapter>) -> Self {
        *self.vision_adapter.lock() = Some(adapter);
        self
    }

    pub fn with_audio_adapter(self, adapter: Box<dyn AudioFeatureAdapter>) -> Self {
        *self.audio_adapter.lock() = Some(adapter);
        self
    }

    pub fn with_face_backend(self, backend: Box<dyn FaceBackend>) -> Self {
        *self.face_backend.lock() = Some(backend);
        self
    }

    /// Enroll the reference identity from one or more embeddings
    pub fn enroll(&self, embeddings: &[Vec<f32>]) -> Result<(), ProctorError> {
        self.identity.lock().enroll(embeddings)
    }

    /// Begin the session; audio calibration starts now
    pub fn start(&self) {
        let now = self.clock.now();
        self.audio.lock().start(now);
        tracing::info!(session_id = %self.session_id, "proctoring session started");
    }

    pub fn on_vision_sample(&self, sample: &VisionSample) {
        if self.is_stopped() {
            return;
        }
        let signals = self.vision.lock().process(sample);
        self.dispatch(signals);
    }

    /// Run the vision adapter over a camera frame and score the result
    pub fn on_vision_frame(&self, frame: &VideoFrame) -> Result<(), ProctorError> {
        if self.is_stopped() {
            return Err(ProctorError::SessionStopped);
        }
        let detected = {
            let mut guard = self.vision_adapter.lock();
            let adapter = guard
                .as_mut()
                .ok_or_else(|| ProctorError::InvalidConfig("no vision adapter".to_string()))?;
            adapter.detect(frame)
        };
        match detected {
            Ok(faces) => self.on_vision_sample(&vision_sample(&faces, frame.timestamp)),
            Err(err) => self.device_error_at(Modality::Vision, &err.to_string(), frame.timestamp),
        }
        Ok(())
    }

    pub fn on_audio_sample(&self, sample: &AudioSample) {
        if self.is_stopped() {
            return;
        }
        let signals = self.audio.lock().process(sample);
        self.dispatch(signals);
    }

    /// Run the audio adapter over a frame, forwarding segment boundaries
    pub fn on_audio_frame(&self, frame: &AudioFrame) -> Result<(), ProctorError> {
        if self.is_stopped() {
            return Err(ProctorError::SessionStopped);
        }
        let analyzed = {
            let mut guard = self.audio_adapter.lock();
            let adapter = guard
                .as_mut()
                .ok_or_else(|| ProctorError::InvalidConfig("no audio adapter".to_string()))?;
            adapter.analyze(frame)
        };
        match analyzed {
            Ok(features) => {
                if features.speech_event == Some(SpeechEvent::Start) {
                    self.on_speech_start(frame.timestamp);
                }
                self.on_audio_sample(&features.to_sample(frame.timestamp));
                if features.speech_event == Some(SpeechEvent::End) {
                    self.on_speech_end(frame.timestamp);
                }
            }
            Err(err) => self.device_error_at(Modality::Audio, &err.to_string(), frame.timestamp),
        }
        Ok(())
    }

    pub fn on_speech_start(&self, at: DateTime<Utc>) {
        if !self.is_stopped() {
            self.audio.lock().speech_started(at);
        }
    }

    pub fn on_speech_end(&self, at: DateTime<Utc>) {
        if !self.is_stopped() {
            self.audio.lock().speech_ended(at);
        }
    }

    pub fn on_identity_observation(&self, observation: &IdentityObservation) {
        if self.is_stopped() {
            return;
        }
        let signals = self.identity.lock().tick(observation);
        self.dispatch(signals);
    }

    /// Run the identity backend over a frame and tick the verifier
    pub fn on_identity_frame(&self, frame: &VideoFrame) -> Result<(), ProctorError> {
        if self.is_stopped() {
            return Err(ProctorError::SessionStopped);
        }
        let observed = {
            let mut guard = self.face_backend.lock();
            let backend = guard
                .as_mut()
                .ok_or_else(|| ProctorError::InvalidConfig("no face backend".to_string()))?;
            observe_identity(&mut **backend, frame, self.config.identity.spoof_threshold)
        };
        match observed {
            Ok(observation) => self.on_identity_observation(&observation),
            Err(err) => {
                self.device_error_at(Modality::Identity, &err.to_string(), frame.timestamp)
            }
        }
        Ok(())
    }

    /// Poll `camera` on the session's own tick loops.
    ///
    /// Vision runs every 125 ms when a vision adapter is set, identity every
    /// `identity.tick_interval_ms` when a face backend is set. The loops hold
    /// only a weak handle, so dropping the session ends them too.
    pub fn start_capture(self: &Arc<Self>, camera: Arc<dyn FrameSource>) -> Result<(), ProctorError> {
        let mut loops = self.capture_loops.lock();
        if self.is_stopped() {
            return Err(ProctorError::SessionStopped);
        }
        if !loops.is_empty() {
            return Ok(());
        }

        let has_vision = self.vision_adapter.lock().is_some();
        let has_identity = self.face_backend.lock().is_some();
        if !has_vision && !has_identity {
            return Err(ProctorError::InvalidConfig(
                "no vision adapter or face backend to capture with".to_string(),
            ));
        }

        if has_vision {
            loops.push(self.spawn_capture_loop(
                "vision",
                VISION_INTERVAL,
                Arc::clone(&camera),
                |session, frame| session.on_vision_frame(frame),
            )?);
        }
        if has_identity {
            let interval_ms = self.identity.lock().interval_ms().max(1) as u64;
            loops.push(self.spawn_capture_loop(
                "identity",
                Duration::from_millis(interval_ms),
                camera,
                |session, frame| session.on_identity_frame(frame),
            )?);
        }
        tracing::info!(session_id = %self.session_id, loops = loops.len(), "capture started");
        Ok(())
    }

    fn spawn_capture_loop<F>(
        self: &Arc<Self>,
        name: &str,
        interval: Duration,
        camera: Arc<dyn FrameSource>,
        on_frame: F,
    ) -> Result<TickLoop, ProctorError>
    where
        F: Fn(&ProctorSession, &VideoFrame) -> Result<(), ProctorError> + Send + 'static,
    {
        let session: Weak<ProctorSession> = Arc::downgrade(self);
        let loop_name = format!("{}-{name}", self.session_id);
        TickLoop::spawn(loop_name, interval, move || {
            let Some(session) = session.upgrade() else {
                return;
            };
            let Some(frame) = camera.latest_frame() else {
                return;
            };
            if let Err(err) = on_frame(&*session, &frame) {
                tracing::trace!(error = %err, "capture tick skipped");
            }
        })
        .map_err(|e| ProctorError::CaptureLoop(e.to_string()))
    }

    /// Capture loops currently running
    pub fn capture_loops(&self) -> usize {
        self.capture_loops
            .lock()
            .iter()
            .filter(|l| l.is_running())
            .count()
    }

    /// Append recorded media to the evidence buffer
    pub fn on_media_chunk(&self, chunk: MediaChunk) -> bool {
        self.evidence.push_chunk(chunk)
    }

    /// A capture device for `modality` failed
    pub fn report_device_error(&self, modality: Modality, message: &str) {
        let now = self.clock.now();
        self.device_error_at(modality, message, now);
    }

    fn device_error_at(&self, modality: Modality, message: &str, now: DateTime<Utc>) {
        if self.is_stopped() {
            return;
        }
        let signals = match modality {
            Modality::Vision => self.vision.lock().report_device_error(now, message),
            Modality::Audio => self.audio.lock().report_device_error(now, message),
            Modality::Identity => self.identity.lock().report_device_error(now, message),
        };
        self.dispatch(signals);
    }

    /// Feed one input record to the matching handler
    pub fn apply(&self, record: &InputRecord) {
        match record {
            InputRecord::Vision(sample) => self.on_vision_sample(sample),
            InputRecord::Audio(sample) => self.on_audio_sample(sample),
            InputRecord::SpeechStart { timestamp } => self.on_speech_start(*timestamp),
            InputRecord::SpeechEnd { timestamp } => self.on_speech_end(*timestamp),
            InputRecord::Identity(observation) => self.on_identity_observation(observation),
            InputRecord::Chunk { timestamp, data } => {
                self.on_media_chunk(MediaChunk::new(*timestamp, data.clone()));
            }
            InputRecord::DeviceError {
                timestamp,
                modality,
                message,
            } => self.device_error_at(*modality, message, *timestamp),
        }
    }

    /// Deliver signals to the sink, capturing evidence for flags first
    fn dispatch(&self, signals: Vec<Signal>) {
        if self.is_stopped() {
            tracing::trace!(dropped = signals.len(), "signals after stop discarded");
            return;
        }
        for mut signal in signals {
            if let Signal::Flag(flag) = &mut signal {
                if flag.severity >= self.config.evidence.capture_min_severity {
                    if let Some(clip) =
                        self.evidence
                            .capture_for_flag(&self.session_id, flag.id, None)
                    {
                        flag.evidence_ref = Some(clip.media_ref);
                    }
                }
            }
            self.sink.emit(signal);
        }
    }

    /// Halt every scorer, join the capture loops, and stop recording.
    ///
    /// Signals from calls racing this one are discarded.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let loops = std::mem::take(&mut *self.capture_loops.lock());
        for mut tick_loop in loops {
            tick_loop.stop();
        }
        self.vision.lock().stop();
        self.audio.lock().stop();
        self.identity.lock().stop();
        self.evidence.stop();
        self.vision_adapter.lock().take();
        self.audio_adapter.lock().take();
        self.face_backend.lock().take();
        tracing::info!(session_id = %self.session_id, "proctoring session stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Start the background evidence upload drain
    pub fn spawn_upload_worker(&self) -> UploadWorker {
        self.evidence.queue().spawn_worker()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &ProctorConfig {
        &self.config
    }

    pub fn vision_score(&self) -> f64 {
        self.vision.lock().composite()
    }

    pub fn audio_score(&self) -> f64 {
        self.audio.lock().composite()
    }

    pub fn is_calibrating(&self) -> bool {
        self.audio.lock().is_calibrating()
    }

    pub fn identity_state(&self) -> IdentityState {
        self.identity.lock().state()
    }

    pub fn evidence(&self) -> &EvidenceRecorder {
        &self.evidence
    }

    pub fn upload_status(&self, flag_id: Uuid) -> Option<UploadState> {
        self.evidence.upload_status(flag_id)
    }

    pub fn bridge(&self) -> &Arc<MouthMotionBridge> {
        &self.bridge
    }
}
