//! Signal encoding
//!
//! This module wraps emitted signals into proctor.signal.v1 records for
//! consumers outside the process (CLI output, FFI callers, log shipping).

use crate::error::ProctorError;
use crate::flags::Signal;
use crate::{PROCTOR_VERSION, PRODUCER_NAME};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current output schema version
pub const SIGNAL_SCHEMA: &str = "proctor.signal.v1";

/// Who produced a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// One output record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub schema: String,
    pub producer: Producer,
    pub session_id: String,
    /// Per-encoder sequence number, starting at 0
    pub seq: u64,
    #[serde(flatten)]
    pub signal: Signal,
}

/// Encoder for producing signal records
pub struct SignalEncoder {
    instance_id: String,
    session_id: String,
    seq: u64,
}

impl SignalEncoder {
    /// Create an encoder with a unique instance ID
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_instance_id(session_id, Uuid::new_v4().to_string())
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(session_id: impl Into<String>, instance_id: String) -> Self {
        Self {
            instance_id,
            session_id: session_id.into(),
            seq: 0,
        }
    }

    pub fn encode(&mut self, signal: Signal) -> SignalRecord {
        let record = SignalRecord {
            schema: SIGNAL_SCHEMA.to_string(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: PROCTOR_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            session_id: self.session_id.clone(),
            seq: self.seq,
            signal,
        };
        self.seq += 1;
        record
    }

    /// Encode to a single-line JSON string
    pub fn encode_to_json(&mut self, signal: Signal) -> Result<String, ProctorError> {
        let record = self.encode(signal);
        serde_json::to_string(&record).map_err(|e| ProctorError::EncodingError(e.to_string()))
    }

    /// Encode a batch as NDJSON lines
    pub fn encode_all(&mut self, signals: Vec<Signal>) -> Result<Vec<String>, ProctorError> {
        signals
            .into_iter()
            .map(|signal| self.encode_to_json(signal))
            .collect()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}
