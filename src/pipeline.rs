//! Record replay
//!
//! Drives a `ProctorSession` from recorded proctor.input.v1 records instead of
//! live adapters. Time comes from the records themselves through a
//! `ManualClock`, so a replay produces the same signals every run.

use crate::clock::ManualClock;
use crate::config::ProctorConfig;
use crate::encoder::SignalEncoder;
use crate::error::ProctorError;
use crate::evidence::{DrainOutcome, MemoryStorage};
use crate::flags::CollectingSink;
use crate::schema::{InputAdapter, InputRecord};
use crate::session::ProctorSession;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Replay NDJSON input records through a fresh session.
///
/// # Arguments
/// * `ndjson` - proctor.input.v1 records, one per line
/// * `config` - Session configuration
/// * `session_id` - Identifier stamped on every output record
///
/// # Returns
/// proctor.signal.v1 JSON records, in emission order
///
/// # Example
/// ```ignore
/// let output = replay_ndjson(&input, ProctorConfig::default(), "exam-42")?;
/// ```
pub fn replay_ndjson(
    ndjson: &str,
    config: ProctorConfig,
    session_id: &str,
) -> Result<Vec<String>, ProctorError> {
    let records = InputAdapter::parse_ndjson(ndjson)?;
    let mut processor = ReplayProcessor::new(config, session_id)?;

    let mut output = Vec::new();
    for record in &records {
        output.extend(processor.push(record)?);
    }
    output.extend(processor.finish()?);
    Ok(output)
}

/// Stateful processor for incremental replay.
///
/// The session starts at the first record's timestamp. Evidence is uploaded
/// to in-memory storage.
pub struct ReplayProcessor {
    clock: Arc<ManualClock>,
    sink: Arc<CollectingSink>,
    storage: Arc<MemoryStorage>,
    session: ProctorSession,
    encoder: SignalEncoder,
    started: bool,
}

impl ReplayProcessor {
    pub fn new(config: ProctorConfig, session_id: &str) -> Result<Self, ProctorError> {
        let clock = Arc::new(ManualClock::new(DateTime::<Utc>::default()));
        let sink = Arc::new(CollectingSink::new());
        let storage = Arc::new(MemoryStorage::new());
        let session = ProctorSession::new(
            session_id,
            config,
            clock.clone(),
            sink.clone(),
            storage.clone(),
        )?;

        Ok(Self {
            clock,
            sink,
            storage,
            session,
            encoder: SignalEncoder::new(session_id),
            started: false,
        })
    }

    /// Enroll the reference identity before replaying identity records
    pub fn enroll(&self, embeddings: &[Vec<f32>]) -> Result<(), ProctorError> {
        self.session.enroll(embeddings)
    }

    /// Apply one record and return the encoded signals it produced
    pub fn push(&mut self, record: &InputRecord) -> Result<Vec<String>, ProctorError> {
        if let Err(e) = record.validate() {
            return Err(ProctorError::ParseError(format!(
                "Invalid {} record: {e}",
                record.kind()
            )));
        }

        self.clock.set(record.timestamp());
        if !self.started {
            self.session.start();
            self.started = true;
        }
        self.session.apply(record);
        self.encoder.encode_all(self.sink.drain())
    }

    /// Parse one JSON record and apply it
    pub fn push_json(&mut self, line: &str) -> Result<Vec<String>, ProctorError> {
        let record = InputAdapter::parse_line(line.trim(), 1)?;
        self.push(&record)
    }

    /// Stop the session and flush queued evidence to storage.
    ///
    /// Returns any signals emitted while stopping.
    pub fn finish(&mut self) -> Result<Vec<String>, ProctorError> {
        self.session.stop();
        match self.session.evidence().queue().drain_pass() {
            DrainOutcome::Backoff { retry_in_ms, .. } => {
                tracing::warn!(retry_in_ms, "evidence left queued after replay");
            }
            DrainOutcome::Drained { uploaded } => {
                tracing::debug!(uploaded, "evidence flushed");
            }
            DrainOutcome::Busy => {}
        }
        self.encoder.encode_all(self.sink.drain())
    }

    pub fn session(&self) -> &ProctorSession {
        &self.session
    }

    /// Storage holding uploaded evidence
    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }
}
