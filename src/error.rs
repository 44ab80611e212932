//! Error types for Proctor Flux

use thiserror::Error;

/// Errors that can occur outside the scoring path.
///
/// Scorers never return these; adapter and storage failures are turned into
/// device-error signals or retries before they reach a consumer.
#[derive(Debug, Error)]
pub enum ProctorError {
    #[error("Failed to parse input record: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Adapter failure on {device}: {message}")]
    AdapterFailure { device: String, message: String },

    #[error("Incompatible embedding: expected {expected} dimensions, got {actual}")]
    IncompatibleEmbedding { expected: usize, actual: usize },

    #[error("Evidence storage error: {0}")]
    StorageError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Session stopped")]
    SessionStopped,

    #[error("Failed to start capture loop: {0}")]
    CaptureLoop(String),
}
