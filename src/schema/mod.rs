//! Unified proctor.input.v1 schema
//!
//! This module defines the capture-side input records a session consumes,
//! either live from adapters or replayed from NDJSON.

mod adapter;
mod record;

pub use adapter::*;
pub use record::*;
