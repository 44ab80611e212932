//! Proctor Flux - On-device behavioral risk scoring for proctored assessments
//!
//! Flux turns per-frame capture features into debounced integrity flags:
//! vision and audio risk scorers → cross-modal lip-sync fusion → identity
//! verification → evidence capture around each flag.
//!
//! ## Modules
//!
//! - **Scoring**: `vision`, `audio`, and `identity` turn samples into snapshots and flags
//! - **Evidence**: rolling media buffer and background upload queue
//! - **Session**: `ProctorSession` wires scorers, evidence, and a `SignalSink` together
//! - **Replay**: drive a session from recorded proctor.input.v1 records

pub mod adapters;
pub mod audio;
pub mod baseline;
pub mod clock;
pub mod config;
pub mod encoder;
pub mod error;
pub mod evidence;
pub mod flags;
pub mod fusion;
pub mod identity;
pub mod pipeline;
pub mod scheduler;
pub mod schema;
pub mod session;
pub mod smoothing;
pub mod types;
pub mod vision;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ProctorConfig;
pub use error::ProctorError;
pub use flags::{CollectingSink, Signal, SignalSink};
pub use pipeline::{replay_ndjson, ReplayProcessor};
pub use scheduler::TickLoop;
pub use session::ProctorSession;

// Schema exports
pub use schema::{InputAdapter, InputRecord, INPUT_SCHEMA};

/// Library version embedded in every output record
pub const PROCTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for output records
pub const PRODUCER_NAME: &str = "proctor-flux";
